//! Per-connection WebSocket handler.
//!
//! Each accepted socket gets a uuid, a welcome envelope, and a task
//! that pumps two directions: the registry's outbound queue into the
//! socket, and inbound control frames (pong, close) into the registry.
//! Inbound text frames are logged and ignored; the stream is one-way.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::debug;

use forgewatch_core::StreamEnvelope;

use crate::server::AppState;

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (id, mut outbound) = state.registry.register().await;
    let (mut sink, mut stream) = socket.split();

    // The welcome goes through the registry queue like every other
    // frame, so it counts toward the connection's sent tally.
    let welcome = StreamEnvelope::system(json!({
        "message": "Connected to machine telemetry stream",
        "connectionId": id,
    }));
    if let Ok(text) = serde_json::to_string(&welcome) {
        state.registry.send_to(id, Message::Text(text)).await;
    }

    loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(Message::Close(frame)) => {
                    // Shutdown or reap: deliver the close frame, then stop.
                    let _ = sink.send(Message::Close(frame)).await;
                    break;
                }
                Some(message) => {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Pong(_))) => state.registry.mark_alive(id).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Text(text))) => {
                    debug!(connection_id = %id, frame = %text, "Ignoring client text frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %id, error = %e, "Socket error");
                    break;
                }
            },
        }
    }

    state.registry.unregister(id).await;
}
