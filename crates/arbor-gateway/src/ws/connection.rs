//! Per-connection WebSocket plumbing.
//!
//! Each socket splits into a reader loop (this task) and a writer task
//! that drains the sink's outbound queue. Registering the queue with the
//! hub is what makes the client part of the session room; dropping it on
//! disconnect is all the cleanup the hub needs.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use arbor_core::config::MAX_PAYLOAD_BYTES;
use arbor_core::ids::ConnId;

use crate::app::AppState;
use crate::ws::dispatch;

/// Axum handler — upgrades GET /ws/session/{session_id}.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, session_id, state))
}

/// Lives for the whole WS session.
async fn handle_connection(socket: WebSocket, session_id: String, state: Arc<AppState>) {
    let conn_id = ConnId::new();
    info!(%conn_id, %session_id, "new WS connection");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(arbor_hub::OUTBOUND_QUEUE_CAPACITY);
    state.hub.connect(&session_id, conn_id.clone(), tx);

    // Writer: one frame at a time, in queue order. Exits when the hub
    // drops the sender or the socket goes away.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let text: &str = &text;
                if text.len() > MAX_PAYLOAD_BYTES {
                    warn!(%conn_id, size = text.len(), "payload too large, dropping connection");
                    break;
                }
                dispatch::handle_frame(&state, &session_id, &conn_id, text).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    state.hub.disconnect(&conn_id);
    writer.abort();
    info!(%conn_id, %session_id, "WS connection closed");
}
