use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{
    stream::{self, BoxStream, SplitStream},
    Sink, SinkExt, StreamExt,
};
use reef_core::{session, App, Outbox, ServerMessage};
use serde::Deserialize;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::handlers::{is_valid_session_id, ServerState};

/// How long queued messages may keep flushing after the read side closed.
const WRITER_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub session: Option<String>,
    pub path: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<ServerState>,
) -> Response {
    let session_id = query
        .session
        .filter(|id| is_valid_session_id(id))
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let path = query.path.unwrap_or_else(|| "/".to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state.app, session_id, path))
}

async fn handle_socket(socket: WebSocket, app: App, session_id: String, path: String) {
    let (sender, receiver) = socket.split();
    let (outbox, rx) = Outbox::channel();
    let ctx = session::connect(&app, &session_id, &path, outbox).await;
    info!(%session_id, connection_id = %ctx.connection_id(), %path, "websocket connected");

    let writer = spawn_writer(sender, rx, session_id.clone());

    // The bootstrap page may be stale relative to restored state.
    ctx.refresh(None, None);
    session::run(ctx, text_frames(receiver)).await;
    finish_writer(writer, WRITER_DRAIN, &session_id).await;
    info!(%session_id, "websocket disconnected");
}

/// Forwards outbox messages to the socket as JSON text frames until the
/// outbox closes or the socket stops accepting writes.
fn spawn_writer<S>(
    mut sink: S,
    mut rx: UnboundedReceiver<ServerMessage>,
    session_id: String,
) -> JoinHandle<()>
where
    S: Sink<Message> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(err) => {
                    warn!(%session_id, error = %err, "failed to encode outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
        debug!(%session_id, "writer task ended");
    })
}

/// Lets the writer flush what is already queued, then aborts it. Background
/// tasks may still hold the outbox open, so the wait is bounded.
async fn finish_writer(mut writer: JoinHandle<()>, window: Duration, session_id: &str) {
    if tokio::time::timeout(window, &mut writer).await.is_err() {
        debug!(session_id, "writer still busy after drain window");
        writer.abort();
        let _ = writer.await;
    }
}

/// Text payloads of the socket. Binary frames are accepted when they hold
/// UTF-8; control frames are skipped; a close frame ends the stream.
fn text_frames(receiver: SplitStream<WebSocket>) -> BoxStream<'static, Result<String, axum::Error>> {
    stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.next().await? {
                Ok(Message::Text(text)) => return Some((Ok(text), receiver)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some((Ok(text), receiver)),
                    Err(_) => debug!("ignoring non-utf8 binary frame"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(err) => return Some((Err(err), receiver)),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tokio::sync::mpsc;

    fn collecting_sink(
        tx: mpsc::UnboundedSender<Message>,
    ) -> impl Sink<Message, Error = Infallible> + Unpin + Send + 'static {
        Box::pin(futures_util::sink::unfold(tx, |tx, message| async move {
            let _ = tx.send(message);
            Ok::<_, Infallible>(tx)
        }))
    }

    #[test_timeout::tokio_timeout_test]
    async fn queued_messages_flush_before_shutdown() {
        let (sent_tx, mut sent) = mpsc::unbounded_channel();
        let (outbox, rx) = Outbox::channel();
        for _ in 0..3 {
            outbox.send(ServerMessage::Pong).unwrap();
        }
        outbox.send(ServerMessage::update_text("count", "3")).unwrap();
        drop(outbox);

        let writer = spawn_writer(collecting_sink(sent_tx), rx, "s1".to_string());
        finish_writer(writer, Duration::from_secs(5), "s1").await;

        let mut frames = Vec::new();
        while let Ok(Message::Text(text)) = sent.try_recv() {
            frames.push(text);
        }
        assert_eq!(frames.len(), 4);
        assert!(frames[3].contains(r#""targetId":"count""#));
    }

    #[test_timeout::tokio_timeout_test]
    async fn writer_held_open_is_aborted_after_the_window() {
        let (sent_tx, _sent) = mpsc::unbounded_channel();
        let (outbox, rx) = Outbox::channel();
        let writer = spawn_writer(collecting_sink(sent_tx), rx, "s1".to_string());

        finish_writer(writer, Duration::from_millis(20), "s1").await;
        assert!(outbox.send(ServerMessage::Pong).is_err());
    }
}
