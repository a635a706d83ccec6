use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::callback::{self, CallbackArgs, CallbackRegistry, Handler, HandlerResult};
use crate::context::{Context, ContextInner};
use crate::node::{Node, Snapshot};
use crate::store::{MemoryStore, SessionStore};
use crate::theme::Theme;

/// Builds the tree for one page. Called on bootstrap, on navigation and on refresh.
pub type PageBuilder = Arc<dyn Fn(&Context) -> Node + Send + Sync>;

/// How the session read loop runs handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Handlers are awaited by the read loop; long work goes through `Context::spawn`.
    #[default]
    Inline,
    /// Every inbound event gets its own task.
    Concurrent,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(DispatchMode::Inline),
            "concurrent" => Ok(DispatchMode::Concurrent),
            other => Err(format!("unknown dispatch mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub session_ttl: Duration,
    pub dispatch_mode: DispatchMode,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(86_400),
            dispatch_mode: DispatchMode::Inline,
        }
    }
}

/// One application instance: pages, handlers, live contexts and shared theme.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    name: String,
    config: AppConfig,
    pages: RwLock<HashMap<String, PageBuilder>>,
    events: RwLock<HashMap<String, Handler>>,
    registry: CallbackRegistry,
    /// Non-owning: a context's lifetime belongs to its connection.
    live: DashMap<Uuid, Weak<ContextInner>>,
    theme: RwLock<Theme>,
    store: Arc<dyn SessionStore>,
}

impl App {
    pub fn new(name: impl Into<String>, store: Arc<dyn SessionStore>, config: AppConfig) -> Self {
        Self {
            inner: Arc::new(AppInner {
                name: name.into(),
                config,
                pages: RwLock::new(HashMap::new()),
                events: RwLock::new(HashMap::new()),
                registry: CallbackRegistry::new(),
                live: DashMap::new(),
                theme: RwLock::new(Theme::default()),
                store,
            }),
        }
    }

    /// App backed by a fresh [`MemoryStore`] with default config.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(name, MemoryStore::new(), AppConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    pub fn page<F>(&self, path: &str, builder: F) -> &Self
    where
        F: Fn(&Context) -> Node + Send + Sync + 'static,
    {
        self.inner
            .pages
            .write()
            .insert(normalize_path(path), Arc::new(builder));
        self
    }

    pub fn has_page(&self, path: &str) -> bool {
        self.inner.pages.read().contains_key(&normalize_path(path))
    }

    /// Registers a handler for client `custom` events named `name`.
    pub fn on_event<F, Fut>(&self, name: &str, f: F) -> &Self
    where
        F: Fn(Context, CallbackArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner
            .events
            .write()
            .insert(name.to_string(), callback::handler(f));
        self
    }

    pub fn event_handler(&self, name: &str) -> Option<Handler> {
        self.inner.events.read().get(name).cloned()
    }

    /// Runs the builder registered for `path`. The page table lock is released
    /// before the builder runs so builders may register callbacks freely.
    pub fn build_page(&self, path: &str, ctx: &Context) -> Option<Node> {
        let builder = self.inner.pages.read().get(&normalize_path(path)).cloned()?;
        Some(builder(ctx))
    }

    /// Renders the initial snapshot for an HTTP page load. Persisted state for
    /// `session_id` is restored first so the page reflects it.
    pub async fn render_bootstrap(&self, path: &str, session_id: &str) -> Option<Snapshot> {
        if !self.has_page(path) {
            return None;
        }
        let ctx = Context::detached(self, session_id, path);
        if let Err(err) = ctx.restore().await {
            warn!(session_id, error = %err, "failed to restore state for bootstrap render");
        }
        self.build_page(path, &ctx).map(|tree| tree.render())
    }

    pub fn theme(&self) -> Theme {
        self.inner.theme.read().clone()
    }

    pub fn set_theme(&self, theme: Theme) {
        *self.inner.theme.write() = theme;
    }

    pub(crate) fn attach(&self, connection_id: Uuid, ctx: &Arc<ContextInner>) {
        self.inner.live.insert(connection_id, Arc::downgrade(ctx));
        debug!(app = %self.inner.name, %connection_id, live = self.inner.live.len(), "context attached");
    }

    pub(crate) fn detach(&self, connection_id: Uuid) {
        self.inner.live.remove(&connection_id);
        debug!(app = %self.inner.name, %connection_id, live = self.inner.live.len(), "context detached");
    }

    /// Currently live contexts. Entries whose context has been dropped are pruned.
    pub fn live_contexts(&self) -> Vec<Context> {
        let mut live = Vec::with_capacity(self.inner.live.len());
        let mut dead = Vec::new();
        for entry in self.inner.live.iter() {
            match entry.value().upgrade() {
                Some(inner) => live.push(Context::from_inner(inner)),
                None => dead.push(*entry.key()),
            }
        }
        // Guards from the iteration above are gone; safe to mutate now.
        for connection_id in dead {
            self.inner
                .live
                .remove_if(&connection_id, |_, weak| weak.strong_count() == 0);
        }
        live
    }

    pub fn live_count(&self) -> usize {
        self.live_contexts().len()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("live", &self.inner.live.len())
            .finish_non_exhaustive()
    }
}

/// Canonical page key: leading slash, no trailing slash except for the root.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Outbox;

    #[test_timeout::timeout]
    fn normalizes_paths() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("about/"), "/about");
        assert_eq!(normalize_path("/a/b/"), "/a/b");
    }

    #[test_timeout::timeout]
    fn parses_dispatch_mode() {
        assert_eq!("Inline".parse::<DispatchMode>(), Ok(DispatchMode::Inline));
        assert_eq!(
            "concurrent".parse::<DispatchMode>(),
            Ok(DispatchMode::Concurrent)
        );
        assert!("parallel".parse::<DispatchMode>().is_err());
    }

    #[test_timeout::timeout]
    fn pages_are_looked_up_by_normalized_path() {
        let app = App::in_memory("test");
        app.page("/about/", |_ctx| Node::text("about").id("about"));
        assert!(app.has_page("about"));
        assert!(!app.has_page("/missing"));

        let ctx = Context::detached(&app, "s", "/about");
        let tree = app.build_page("/about", &ctx).unwrap();
        assert_eq!(tree.identity(), "about");
        assert!(app.build_page("/missing", &ctx).is_none());
    }

    #[test_timeout::timeout]
    fn live_registry_does_not_own_contexts() {
        let app = App::in_memory("test");
        let (outbox, _rx) = Outbox::channel();
        let ctx = Context::connect(&app, "s1", "/", outbox);
        assert_eq!(app.live_count(), 1);

        drop(ctx);
        assert_eq!(app.live_count(), 0);
        assert!(app.live_contexts().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn bootstrap_renders_with_restored_state() {
        let app = App::in_memory("test");
        app.page("/", |ctx| {
            let count = ctx.get_state_as::<i64>("count").unwrap_or(0);
            Node::text(count).id("count")
        });
        let data = serde_json::json!({"count": 5}).as_object().cloned().unwrap();
        app.store()
            .set("s1", data, Duration::from_secs(60))
            .await
            .unwrap();

        let snapshot = app.render_bootstrap("/", "s1").await.unwrap();
        assert_eq!(snapshot.text(), "5");
        assert!(app.render_bootstrap("/nope", "s1").await.is_none());
        assert_eq!(app.live_count(), 0);
    }
}
