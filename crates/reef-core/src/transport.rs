use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::ServerMessage;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("context has no transport attached")]
    Detached,
}

/// Sending half of a connection. Messages are queued in order and drained by
/// the connection's writer task.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: Option<mpsc::UnboundedSender<ServerMessage>>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// An outbox with nowhere to deliver, used for render-only contexts.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, message: ServerMessage) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Detached)?;
        tx.send(message).map_err(|_| TransportError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}
