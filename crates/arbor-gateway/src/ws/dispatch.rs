//! Inbound WS frame dispatch.
//!
//! Chat turns run in their own tasks so the reader loop keeps draining
//! frames; per-operation event ordering is preserved by the hub's
//! per-sink queues. Lightweight frames (`node_update`, `ping`) are
//! handled inline.

use std::sync::Arc;

use tracing::warn;

use arbor_core::ids::{self, ConnId};
use arbor_graph::types::NodePatch;
use arbor_protocol::frames::{self, ChatParams, NodeUpdateParams};
use arbor_protocol::{InboundFrame, ServerEvent};

use crate::app::AppState;

pub async fn handle_frame(state: &Arc<AppState>, session_id: &str, conn_id: &ConnId, text: &str) {
    let frame = match InboundFrame::parse(text) {
        Ok(frame) => frame,
        Err(_) => {
            state.hub.send_error(conn_id, "Invalid message format");
            return;
        }
    };

    match frame.frame_type.as_str() {
        frames::CHAT => {
            let params: ChatParams = match frame.data_as() {
                Ok(params) => params,
                Err(e) => {
                    state.hub.send_error(conn_id, format!("invalid chat payload: {e}"));
                    return;
                }
            };
            spawn_chat(state, session_id, conn_id, params);
        }

        frames::CREATE_REFERENCE_AND_CHAT => {
            let params: ChatParams = match frame.data_as() {
                Ok(params) => params,
                Err(e) => {
                    state.hub.send_error(conn_id, format!("invalid chat payload: {e}"));
                    return;
                }
            };
            let state = Arc::clone(state);
            let session_id = session_id.to_string();
            let conn_id = conn_id.clone();
            tokio::spawn(async move {
                if let Err(e) = state
                    .pipeline
                    .create_reference_and_chat(&session_id, &params.node_id, &params.message)
                    .await
                {
                    warn!(error = %e, "create_reference_and_chat failed");
                    state
                        .hub
                        .send_error(&conn_id, format!("reference chat failed: {e}"));
                }
            });
        }

        frames::NODE_UPDATE => {
            let params: NodeUpdateParams = match frame.data_as() {
                Ok(params) => params,
                Err(e) => {
                    state
                        .hub
                        .send_error(conn_id, format!("invalid node_update payload: {e}"));
                    return;
                }
            };
            let patch = NodePatch {
                title: params.title,
                is_active: params.is_active,
                metadata: params.metadata,
                ..Default::default()
            };
            match state.nodes.update(&params.node_id, patch) {
                Ok(Some(node)) => {
                    state.hub.broadcast(
                        session_id,
                        &ServerEvent::NodeUpdated {
                            session_id: session_id.to_string(),
                            data: node,
                        },
                        None,
                    );
                }
                Ok(None) => {
                    state
                        .hub
                        .send_error(conn_id, format!("node not found: {}", params.node_id));
                }
                Err(e) => {
                    warn!(error = %e, "node_update failed");
                    state.hub.send_error(conn_id, e.to_string());
                }
            }
        }

        frames::PING => {
            state.hub.send(
                conn_id,
                &ServerEvent::Pong {
                    timestamp: ids::now(),
                },
            );
        }

        other => {
            state
                .hub
                .send_error(conn_id, format!("Unknown message type: {other}"));
        }
    }
}

/// Run one chat turn in its own task. Streaming turns broadcast their own
/// progress; the non-streaming path ends in a single `chat_response`.
fn spawn_chat(state: &Arc<AppState>, session_id: &str, conn_id: &ConnId, params: ChatParams) {
    let state = Arc::clone(state);
    let session_id = session_id.to_string();
    let conn_id = conn_id.clone();
    tokio::spawn(async move {
        if params.stream {
            if let Err(e) = state
                .pipeline
                .chat_streaming(&session_id, &params.node_id, &params.message, params.auto_branch)
                .await
            {
                warn!(error = %e, "streaming chat failed");
                state.hub.send_error(&conn_id, e.to_string());
            }
        } else {
            match state
                .pipeline
                .chat(&session_id, &params.node_id, &params.message, params.auto_branch)
                .await
            {
                Ok(outcome) => {
                    state.hub.broadcast(
                        &session_id,
                        &ServerEvent::ChatResponse {
                            session_id: session_id.clone(),
                            data: outcome.turn,
                            updated_node: outcome.updated_node,
                        },
                        None,
                    );
                }
                Err(e) => {
                    warn!(error = %e, "chat failed");
                    state.hub.send_error(&conn_id, e.to_string());
                }
            }
        }
    });
}
