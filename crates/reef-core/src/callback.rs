use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::Context;
use crate::protocol::CallbackDescriptor;

pub type HandlerResult = anyhow::Result<()>;
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// Server-side interaction handler. Receives the context of the connection
/// that fired the event plus the merged arguments.
pub type Handler = Arc<dyn Fn(Context, CallbackArgs) -> HandlerFuture + Send + Sync>;

pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Context, CallbackArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx, args| Box::pin(f(ctx, args)))
}

/// Arguments handed to a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackArgs(Map<String, Value>);

impl CallbackArgs {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    /// Merges the sources of an invocation. Later sources win on key
    /// conflicts: event `data`, then the client's echo of the bound args,
    /// then the bound args captured at registration.
    pub fn merge(
        data: Map<String, Value>,
        echoed: Map<String, Value>,
        bound: &Map<String, Value>,
    ) -> Self {
        let mut merged = data;
        merged.extend(echoed);
        merged.extend(bound.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0.get(key).and_then(|value| T::deserialize(value).ok())
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// A registered handler with the arguments bound when it was attached.
pub struct CallbackBinding {
    id: String,
    handler: Handler,
    bound_args: Map<String, Value>,
}

impl CallbackBinding {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bound_args(&self) -> &Map<String, Value> {
        &self.bound_args
    }

    pub fn descriptor(&self) -> CallbackDescriptor {
        CallbackDescriptor {
            callback_id: self.id.clone(),
            bound_args: self.bound_args.clone(),
        }
    }

    pub fn invoke(&self, ctx: Context, args: CallbackArgs) -> HandlerFuture {
        (self.handler)(ctx, args)
    }
}

impl std::fmt::Debug for CallbackBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackBinding")
            .field("id", &self.id)
            .field("bound_args", &self.bound_args)
            .finish_non_exhaustive()
    }
}

/// Application-scoped map of callback ids to handlers.
///
/// Shared by every context of one application; `DashMap` shards serialize
/// concurrent registration and lookup. Entries live until [`clear`] is called.
///
/// [`clear`]: CallbackRegistry::clear
#[derive(Default)]
pub struct CallbackRegistry {
    entries: DashMap<String, Arc<CallbackBinding>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Handler, bound_args: Map<String, Value>) -> CallbackDescriptor {
        let id = Uuid::new_v4().to_string();
        let binding = Arc::new(CallbackBinding {
            id: id.clone(),
            handler,
            bound_args,
        });
        let descriptor = binding.descriptor();
        self.entries.insert(id, binding);
        descriptor
    }

    pub fn resolve(&self, callback_id: &str) -> Option<Arc<CallbackBinding>> {
        self.entries
            .get(callback_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
