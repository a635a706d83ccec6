use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::app::{normalize_path, App};
use crate::broadcast;
use crate::callback::{self, CallbackArgs, HandlerResult};
use crate::event::EventKind;
use crate::locator::locate;
use crate::node::Node;
use crate::protocol::{
    into_args, CallbackDescriptor, SavePropDescriptor, ServerMessage, ToastVariant,
};
use crate::state::{State, StateError};
use crate::store::StoreError;
use crate::theme::Theme;
use crate::transport::{Outbox, TransportError};

/// Cooperative cancellation signal shared between a context and the
/// background tasks it spawned.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to one live connection (or a render-only stand-in for one).
///
/// Cloning is cheap; clones share state, outbox and stop flag. Handlers and
/// spawned tasks receive clones, the app registry only holds a weak reference.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

pub(crate) struct ContextInner {
    app: App,
    session_id: String,
    connection_id: Uuid,
    outbox: Outbox,
    state: RwLock<State>,
    path: RwLock<String>,
    stop: StopFlag,
    persist_lock: tokio::sync::Mutex<()>,
}

impl Context {
    /// Creates a context for a live connection and registers it with the app.
    pub fn connect(app: &App, session_id: impl Into<String>, path: &str, outbox: Outbox) -> Self {
        let ctx = Self::build(app, session_id.into(), path, outbox);
        app.attach(ctx.inner.connection_id, &ctx.inner);
        ctx
    }

    /// A context with no transport, used to render a page outside a connection.
    /// It is never registered, so broadcasts skip it.
    pub fn detached(app: &App, session_id: impl Into<String>, path: &str) -> Self {
        Self::build(app, session_id.into(), path, Outbox::detached())
    }

    fn build(app: &App, session_id: String, path: &str, outbox: Outbox) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                app: app.clone(),
                session_id,
                connection_id: Uuid::new_v4(),
                outbox,
                state: RwLock::new(State::new()),
                path: RwLock::new(normalize_path(path)),
                stop: StopFlag::default(),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    pub fn app(&self) -> &App {
        &self.inner.app
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn connection_id(&self) -> Uuid {
        self.inner.connection_id
    }

    pub fn current_path(&self) -> String {
        self.inner.path.read().clone()
    }

    pub(crate) fn set_path(&self, path: &str) {
        *self.inner.path.write() = normalize_path(path);
    }

    pub fn try_send(&self, message: ServerMessage) -> Result<(), TransportError> {
        self.inner.outbox.send(message)
    }

    /// Queues `message` for this connection. Failures are logged and reported
    /// as `false`; they never reach the caller as an error.
    pub fn send(&self, message: ServerMessage) -> bool {
        let kind = EventKind::for_server(&message);
        match self.try_send(message) {
            Ok(()) => true,
            Err(err) => {
                debug!(
                    session_id = %self.inner.session_id,
                    connection_id = %self.inner.connection_id,
                    ?kind,
                    error = %err,
                    "dropping outbound message"
                );
                false
            }
        }
    }

    pub fn update_text(&self, target_id: &str, text: impl Into<String>) -> bool {
        self.send(ServerMessage::update_text(target_id, text))
    }

    pub fn update_props(&self, target_id: &str, props: Value) -> bool {
        self.send(ServerMessage::update_props(target_id, into_args(props)))
    }

    pub fn replace(&self, target_id: &str, node: &Node) -> bool {
        self.send(ServerMessage::replace(target_id, node.render()))
    }

    /// Rebuilds the page at `path` (or the current one). Without a target the
    /// whole tree is sent; with one, only the located subtree is replaced.
    /// Returns whether a message was emitted.
    pub fn refresh(&self, target_id: Option<&str>, path: Option<&str>) -> bool {
        let path = path.map(normalize_path).unwrap_or_else(|| self.current_path());
        let Some(tree) = self.inner.app.build_page(&path, self) else {
            warn!(session_id = %self.inner.session_id, %path, "refresh for unknown page");
            return false;
        };
        let Some(target) = target_id else {
            return self.send(ServerMessage::Refresh {
                component: tree.render(),
            });
        };
        match locate(&tree, target) {
            Some(node) => self.send(ServerMessage::replace(target, node.render())),
            None => {
                debug!(session_id = %self.inner.session_id, %path, target_id = target, "refresh target not in tree");
                false
            }
        }
    }

    pub fn show_toast(&self, message: impl Into<String>, variant: ToastVariant) -> bool {
        self.send(ServerMessage::Toast {
            message: message.into(),
            variant,
            duration: None,
        })
    }

    pub fn show_toast_for(
        &self,
        message: impl Into<String>,
        variant: ToastVariant,
        duration_ms: u64,
    ) -> bool {
        self.send(ServerMessage::Toast {
            message: message.into(),
            variant,
            duration: Some(duration_ms),
        })
    }

    pub fn navigate(&self, path: &str) -> bool {
        self.set_path(path);
        self.send(ServerMessage::Navigate {
            path: self.current_path(),
        })
    }

    pub fn show_modal(&self, title: impl Into<String>, body: &Node) -> bool {
        self.send(ServerMessage::Modal {
            open: true,
            title: Some(title.into()),
            component: Some(body.render()),
        })
    }

    pub fn close_modal(&self) -> bool {
        self.send(ServerMessage::Modal {
            open: false,
            title: None,
            component: None,
        })
    }

    /// Registers `f` with the app registry. `bound_args` is captured now and
    /// merged into every invocation; non-object values land under `"value"`.
    pub fn callback<F, Fut>(&self, f: F, bound_args: Value) -> CallbackDescriptor
    where
        F: Fn(Context, CallbackArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner
            .app
            .registry()
            .register(callback::handler(f), into_args(bound_args))
    }

    pub fn save_prop(&self, state_key: impl Into<String>, debounce_ms: Option<u64>) -> SavePropDescriptor {
        SavePropDescriptor {
            state_key: state_key.into(),
            debounce_ms,
        }
    }

    /// Makes `theme` the app theme and pushes it to this connection only.
    pub fn set_theme(&self, theme: Theme) -> bool {
        self.inner.app.set_theme(theme.clone());
        self.send(ServerMessage::ThemeUpdate { theme })
    }

    /// Like [`Context::set_theme`], then fans the theme out to every other live
    /// context. Returns how many of those others received it.
    pub fn broadcast_theme(&self, theme: Theme) -> usize {
        self.set_theme(theme.clone());
        broadcast::broadcast_except(
            &self.inner.app,
            self.inner.connection_id,
            ServerMessage::ThemeUpdate { theme },
        )
    }

    pub fn state(&self) -> State {
        self.inner.state.read().clone()
    }

    pub fn state_snapshot(&self) -> Map<String, Value> {
        self.inner.state.read().to_map()
    }

    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.inner.state.read().get(key).cloned()
    }

    pub fn get_state_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner.state.read().get_as(key)
    }

    pub fn set_state(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner.state.write().set(key, value)
    }

    /// Runs `f` under the state read lock. Calling back into this context's
    /// state accessors from `f` deadlocks.
    pub fn with_state<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&self.inner.state.read())
    }

    /// Runs `f` under the state write lock. Calling back into this context's
    /// state accessors from `f` deadlocks.
    pub fn update_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.inner.state.write())
    }

    /// Declares the shape state should decode as. Existing values are kept.
    pub fn declare_schema<T: DeserializeOwned>(&self) {
        let mut state = self.inner.state.write();
        let mut typed = State::with_schema::<T>();
        typed.replace_values(state.to_map());
        *state = typed;
    }

    pub fn validate_state(&self) -> Result<(), StateError> {
        self.inner.state.read().validate()
    }

    /// Runs `future` as an independent task. Errors and panics are logged, never
    /// propagated; long-running work should poll [`Context::is_connected`].
    /// A task that outlives its connection persists state once it finishes.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let ctx = self.clone();
        tokio::spawn(async move {
            let session_id = ctx.session_id();
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(%session_id, error = %err, "background task failed"),
                Err(payload) => error!(
                    %session_id,
                    panic = %panic_message(&*payload),
                    "background task panicked"
                ),
            }
            if ctx.inner.stop.is_stopped() {
                if let Err(err) = ctx.persist().await {
                    warn!(%session_id, error = %err, "failed to persist state after background task");
                }
            }
        })
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.inner.stop.clone()
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.stop.is_stopped() && !self.inner.outbox.is_closed()
    }

    /// Writes the current state to the app's session store. Writes from one
    /// context are serialized and each snapshots state after the previous one
    /// completed.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.inner.persist_lock.lock().await;
        let data = self.state_snapshot();
        let ttl = self.inner.app.config().session_ttl;
        self.inner
            .app
            .store()
            .set(&self.inner.session_id, data, ttl)
            .await
    }

    /// Loads persisted state for this session. Returns `false` when nothing was
    /// stored (or it expired), leaving current state untouched.
    pub async fn restore(&self) -> Result<bool, StoreError> {
        let loaded = self.inner.app.store().get(&self.inner.session_id).await?;
        let Some(values) = loaded else {
            return Ok(false);
        };
        self.update_state(|state| state.replace_values(values));
        Ok(true)
    }

    /// Ends the connection: stops background work, leaves the live registry and
    /// persists state. Store faults are logged.
    pub async fn disconnect(&self) {
        self.inner.stop.stop();
        self.inner.app.detach(self.inner.connection_id);
        if let Err(err) = self.persist().await {
            warn!(session_id = %self.inner.session_id, error = %err, "failed to persist session state");
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("session_id", &self.inner.session_id)
            .field("connection_id", &self.inner.connection_id)
            .field("path", &*self.inner.path.read())
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn counter_app() -> App {
        let app = App::in_memory("test");
        app.page("/", |ctx| {
            let count = ctx.get_state_as::<i64>("count").unwrap_or(0);
            Node::container()
                .id("root")
                .child(Node::text(count).id("count"))
                .child(Node::button("+1").id("inc"))
        });
        app
    }

    fn connected(app: &App) -> (Context, UnboundedReceiver<ServerMessage>) {
        let (outbox, rx) = Outbox::channel();
        (Context::connect(app, "s1", "/", outbox), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[test_timeout::timeout]
    fn update_primitives_emit_one_message_each() {
        let app = counter_app();
        let (ctx, mut rx) = connected(&app);

        assert!(ctx.update_text("count", "3"));
        assert!(ctx.update_props("inc", json!({"disabled": true})));
        assert!(ctx.replace("count", &Node::text("4").id("count")));

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], ServerMessage::update_text("count", "3"));
        assert_eq!(messages[1].target_id(), Some("inc"));
        assert_eq!(
            serde_json::to_value(&messages[2]).unwrap()["operation"],
            "replace"
        );
    }

    #[test_timeout::timeout]
    fn partial_refresh_hits_and_misses() {
        let app = counter_app();
        let (ctx, mut rx) = connected(&app);
        ctx.set_state("count", 7);

        assert!(ctx.refresh(Some("count"), None));
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            ServerMessage::Update {
                target_id,
                component: Some(component),
                ..
            } => {
                assert_eq!(target_id, "count");
                assert_eq!(component.text(), "7");
            }
            other => panic!("unexpected message {other:?}"),
        }

        assert!(!ctx.refresh(Some("missing"), None));
        assert!(!ctx.refresh(None, Some("/nowhere")));
        assert!(drain(&mut rx).is_empty());

        assert!(ctx.refresh(None, None));
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerMessage::Refresh { .. }]
        ));
    }

    #[test_timeout::timeout]
    fn navigate_updates_path_and_notifies() {
        let app = counter_app();
        let (ctx, mut rx) = connected(&app);
        assert!(ctx.navigate("about/"));
        assert_eq!(ctx.current_path(), "/about");
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::Navigate {
                path: "/about".into()
            }]
        );
    }

    #[test_timeout::timeout]
    fn sends_after_disconnect_are_swallowed() {
        let app = counter_app();
        let (ctx, rx) = connected(&app);
        drop(rx);
        assert!(!ctx.is_connected());
        assert!(!ctx.show_toast("gone", ToastVariant::Info));
        assert_eq!(ctx.try_send(ServerMessage::Pong), Err(TransportError::Closed));

        let detached = Context::detached(&app, "s2", "/");
        assert_eq!(
            detached.try_send(ServerMessage::Pong),
            Err(TransportError::Detached)
        );
    }

    #[test_timeout::timeout]
    fn set_theme_updates_app_and_own_connection() {
        let app = counter_app();
        let (ctx, mut rx) = connected(&app);
        let dark = Theme::new("dark").with_token("mode", "dark");

        assert!(ctx.set_theme(dark.clone()));
        assert_eq!(app.theme(), dark);
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::ThemeUpdate { theme: dark }]
        );
    }

    #[test_timeout::timeout]
    fn declared_schema_keeps_values() {
        #[derive(serde::Deserialize)]
        #[allow(dead_code)]
        struct Form {
            name: String,
        }

        let app = counter_app();
        let ctx = Context::detached(&app, "s", "/");
        ctx.set_state("name", 42);
        ctx.declare_schema::<Form>();
        assert_eq!(ctx.get_state("name"), Some(json!(42)));
        assert!(ctx.validate_state().is_err());

        ctx.set_state("name", "Ada");
        assert!(ctx.validate_state().is_ok());
    }

    #[test_timeout::tokio_timeout_test]
    async fn spawned_failures_are_contained() {
        let app = counter_app();
        let (ctx, _rx) = connected(&app);

        let failed = ctx.spawn(async { Err(anyhow::anyhow!("boom")) });
        let session_id = ctx.session_id().to_string();
        let panicked = ctx.spawn(async move {
            if session_id == "s1" {
                panic!("kaboom");
            }
            Ok(())
        });
        assert!(failed.await.is_ok());
        assert!(panicked.await.is_ok());
    }

    #[test_timeout::tokio_timeout_test]
    async fn disconnect_stops_detaches_and_persists() {
        let app = counter_app();
        let (ctx, _rx) = connected(&app);
        let flag = ctx.stop_flag();
        ctx.set_state("count", 2);

        ctx.disconnect().await;
        assert!(flag.is_stopped());
        assert!(!ctx.is_connected());
        assert_eq!(app.live_count(), 0);

        let (next, _rx2) = connected(&app);
        assert!(next.restore().await.unwrap());
        assert_eq!(next.get_state_as::<i64>("count"), Some(2));
    }

    #[test_timeout::tokio_timeout_test]
    async fn background_work_after_disconnect_is_persisted() {
        let app = counter_app();
        let (ctx, rx) = connected(&app);
        ctx.set_state("job_running", true);

        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let job = ctx.clone();
        let handle = ctx.spawn(async move {
            let _ = released.await;
            job.set_state("job_running", false);
            Ok(())
        });

        drop(rx);
        ctx.disconnect().await;
        release.send(()).unwrap();
        handle.await.unwrap();

        let (next, _rx) = connected(&app);
        assert!(next.restore().await.unwrap());
        assert_eq!(next.get_state_as::<bool>("job_running"), Some(false));
    }

    #[test_timeout::tokio_timeout_test]
    async fn background_work_while_connected_does_not_persist() {
        let app = counter_app();
        let (ctx, _rx) = connected(&app);
        let job = ctx.clone();
        ctx.spawn(async move {
            job.set_state("count", 1);
            Ok(())
        })
        .await
        .unwrap();
        assert!(!app.store().exists("s1").await.unwrap());
    }

    #[test_timeout::timeout]
    fn partial_refresh_reaches_into_fallbacks() {
        let app = App::in_memory("test");
        app.page("/", |ctx| {
            let loaded = ctx.get_state_as::<bool>("loaded").unwrap_or(false);
            Node::container()
                .id("root")
                .child(
                    Node::placeholder(
                        Node::row()
                            .id("stats-loading")
                            .child(Node::text(if loaded { "ready" } else { "loading" }).id("stats-label")),
                    )
                    .id("stats"),
                )
                .child(
                    Node::custom("Chart")
                        .id("chart")
                        .fallback(Node::text("no chart").id("chart-fallback")),
                )
        });
        let (ctx, mut rx) = connected(&app);
        ctx.set_state("loaded", true);

        assert!(ctx.refresh(Some("stats-label"), None));
        assert!(ctx.refresh(Some("chart-fallback"), None));
        match drain(&mut rx).as_slice() {
            [ServerMessage::Update {
                target_id: first,
                component: Some(label),
                ..
            }, ServerMessage::Update {
                target_id: second,
                component: Some(chart),
                ..
            }] => {
                assert_eq!(first, "stats-label");
                assert_eq!(label.text(), "ready");
                assert_eq!(second, "chart-fallback");
                assert_eq!(chart.text(), "no chart");
            }
            other => panic!("unexpected messages {other:?}"),
        }
    }
}
