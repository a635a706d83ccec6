//! Per-connection read loop: parses inbound frames and dispatches them
//! against a [`Context`].

use std::fmt::Display;
use std::panic::AssertUnwindSafe;

use futures::{FutureExt, Stream, StreamExt};
use tokio::task::JoinSet;
use tracing::{debug, debug_span, error, info, warn, Instrument};

use crate::app::{App, DispatchMode};
use crate::callback::{CallbackArgs, HandlerFuture};
use crate::context::{panic_message, Context};
use crate::event::{Event, EventKind};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::Outbox;

/// Registers a new context for `session_id` and restores its persisted state.
/// A store fault is logged and the session starts with empty state.
pub async fn connect(app: &App, session_id: &str, path: &str, outbox: Outbox) -> Context {
    let ctx = Context::connect(app, session_id, path, outbox);
    match ctx.restore().await {
        Ok(restored) => debug!(session_id, restored, "session state loaded"),
        Err(err) => warn!(session_id, error = %err, "failed to restore session state"),
    }
    ctx
}

/// Drives one connection until `frames` ends or yields a read error, then
/// disconnects the context. Handler faults never end the loop.
pub async fn run<S, E>(ctx: Context, mut frames: S)
where
    S: Stream<Item = Result<String, E>> + Unpin,
    E: Display,
{
    let mode = ctx.app().config().dispatch_mode;
    let mut tasks = JoinSet::new();
    info!(
        session_id = %ctx.session_id(),
        connection_id = %ctx.connection_id(),
        ?mode,
        "session started"
    );

    while let Some(frame) = frames.next().await {
        let text = match frame {
            Ok(text) => text,
            Err(err) => {
                warn!(session_id = %ctx.session_id(), error = %err, "transport read failed");
                break;
            }
        };
        let message = match ClientMessage::parse(&text) {
            Ok(message) => message,
            Err(err) => {
                warn!(session_id = %ctx.session_id(), error = %err, "rejecting client frame");
                ctx.send(ServerMessage::Error {
                    message: err.to_string(),
                });
                continue;
            }
        };
        match mode {
            DispatchMode::Concurrent if runs_handler(&message) => {
                let task_ctx = ctx.clone();
                tasks.spawn(async move { dispatch(&task_ctx, message).await });
                while tasks.try_join_next().is_some() {}
            }
            _ => dispatch(&ctx, message).await,
        }
    }

    ctx.disconnect().await;
    // In-flight handlers keep their own context clone and observe the stop flag.
    tasks.detach_all();
    info!(
        session_id = %ctx.session_id(),
        connection_id = %ctx.connection_id(),
        "session ended"
    );
}

/// Messages that invoke user code. Only these leave the read loop in
/// concurrent mode; state, navigation and keepalive frames apply in order.
fn runs_handler(message: &ClientMessage) -> bool {
    matches!(
        message,
        ClientMessage::Callback { .. } | ClientMessage::Custom { .. }
    )
}

/// Routes one parsed client message.
pub async fn dispatch(ctx: &Context, message: ClientMessage) {
    let event = Event::from_client(&message, ctx.session_id());
    let span = debug_span!(
        "dispatch",
        session_id = %event.session_id,
        event_id = %event.event_id,
        kind = ?event.kind
    );
    handle(ctx, message).instrument(span).await
}

async fn handle(ctx: &Context, message: ClientMessage) {
    match message {
        ClientMessage::Callback {
            callback_id,
            bound_args,
            data,
        } => {
            let Some(binding) = ctx.app().registry().resolve(&callback_id) else {
                warn!(%callback_id, "unknown callback; ignoring");
                return;
            };
            let args = CallbackArgs::merge(data, bound_args, binding.bound_args());
            run_handler(binding.invoke(ctx.clone(), args), "callback").await;
        }
        ClientMessage::StateSync { key, value } => {
            ctx.set_state(key.as_str(), value);
            debug!(kind = ?EventKind::StoreUpdate, %key, "state synced");
            if let Err(err) = ctx.persist().await {
                warn!(error = %err, "failed to write synced state");
            }
        }
        ClientMessage::Navigate { path } => {
            ctx.set_path(&path);
            ctx.refresh(None, None);
        }
        ClientMessage::StoreInit => {
            ctx.send(ServerMessage::StoreSnapshot {
                state: ctx.state_snapshot(),
            });
        }
        ClientMessage::Custom { name, data } => match ctx.app().event_handler(&name) {
            Some(handler) => run_handler(handler(ctx.clone(), CallbackArgs::new(data)), "event").await,
            None => debug!(%name, "no handler for custom event"),
        },
        ClientMessage::Ping => {
            ctx.send(ServerMessage::Pong);
            let ttl = ctx.app().config().session_ttl;
            if let Err(err) = ctx.app().store().touch(ctx.session_id(), ttl).await {
                debug!(error = %err, "failed to extend session ttl");
            }
        }
    }
}

async fn run_handler(future: HandlerFuture, handler: &'static str) {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(handler, error = %err, "handler failed"),
        Err(payload) => error!(handler, panic = %panic_message(&*payload), "handler panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::tokio_timeout_test]
    async fn store_init_answers_with_state() {
        let app = App::in_memory("test");
        let (outbox, mut rx) = Outbox::channel();
        let ctx = connect(&app, "s1", "/", outbox).await;
        ctx.set_state("name", "Ada");

        dispatch(&ctx, ClientMessage::StoreInit).await;
        let expected = json!({"name": "Ada"}).as_object().cloned().unwrap();
        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::StoreSnapshot { state: expected })
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn ping_extends_persisted_session() {
        let app = App::in_memory("test");
        let (outbox, mut rx) = Outbox::channel();
        let ctx = connect(&app, "s1", "/", outbox).await;
        ctx.persist().await.unwrap();

        dispatch(&ctx, ClientMessage::Ping).await;
        assert_eq!(rx.recv().await, Some(ServerMessage::Pong));
        assert!(app.store().exists("s1").await.unwrap());
    }
}
