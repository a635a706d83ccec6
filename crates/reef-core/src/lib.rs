//! Reactive session core for Reef server-driven UIs.
//!
//! A page is described on the server as a tree of [`Node`]s. Each live
//! connection gets a [`Context`] that dispatches client interactions to
//! handlers registered in the application's [`CallbackRegistry`] and turns
//! handler mutations into targeted update messages. State that must survive a
//! reconnect goes through a [`SessionStore`].

pub mod app;
pub mod broadcast;
pub mod callback;
pub mod context;
pub mod event;
pub mod locator;
pub mod node;
pub mod protocol;
pub mod session;
pub mod state;
pub mod store;
pub mod theme;
pub mod transport;

pub use app::{normalize_path, App, AppConfig, DispatchMode};
pub use callback::{CallbackArgs, CallbackBinding, CallbackRegistry, Handler, HandlerResult};
pub use context::{Context, StopFlag};
pub use event::{Event, EventKind, EventSource};
pub use locator::locate;
pub use node::{Child, Direction, Node, NodeKind, Snapshot, SnapshotChild};
pub use protocol::{
    CallbackDescriptor, ClientMessage, ProtocolError, SavePropDescriptor, ServerMessage,
    ToastVariant, UpdateOperation,
};
pub use state::{State, StateError};
pub use store::{MemoryStore, RedisStore, SessionData, SessionStore, StoreError};
pub use theme::Theme;
pub use transport::{Outbox, TransportError};
