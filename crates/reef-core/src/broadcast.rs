//! Fan-out of one message to every live context of an app.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::App;
use crate::event::EventKind;
use crate::protocol::ServerMessage;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Sends `message` to every live context. Returns the number of successful sends.
pub fn broadcast(app: &App, message: ServerMessage) -> usize {
    fan_out(app, None, message).delivered
}

/// Like [`broadcast`], skipping the context with `connection_id`.
pub fn broadcast_except(app: &App, connection_id: Uuid, message: ServerMessage) -> usize {
    fan_out(app, Some(connection_id), message).delivered
}

/// Each recipient is attempted independently; one failed send never stops
/// delivery to the rest.
pub fn fan_out(app: &App, skip: Option<Uuid>, message: ServerMessage) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    let kind = EventKind::for_server(&message);

    for ctx in app.live_contexts() {
        if Some(ctx.connection_id()) == skip {
            continue;
        }
        report.attempted += 1;
        match ctx.try_send(message.clone()) {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                report.failed += 1;
                warn!(
                    session_id = %ctx.session_id(),
                    connection_id = %ctx.connection_id(),
                    error = %err,
                    "broadcast delivery failed"
                );
            }
        }
    }

    debug!(
        app = %app.name(),
        ?kind,
        attempted = report.attempted,
        delivered = report.delivered,
        failed = report.failed,
        "broadcast complete"
    );
    report
}

impl App {
    pub fn broadcast(&self, message: ServerMessage) -> usize {
        broadcast(self, message)
    }
}
