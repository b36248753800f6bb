//! Session resource handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use arbor_graph::types::{NewNode, NewSession, Node, Session, SessionPatch, SessionWithNodes};
use arbor_protocol::ServerEvent;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    pub user_id: Option<String>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_session_limit")]
    pub limit: usize,
}

fn default_session_limit() -> usize {
    10
}

/// POST /api/v1/sessions — create a session (and its root node).
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewSession>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    if body.title.trim().is_empty() {
        return Err(ApiError::Validation("title must not be empty".into()));
    }
    let session = state.sessions.create(body)?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/v1/sessions?user_id=&skip=&limit=
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionListQuery>,
) -> ApiResult<Json<Vec<Session>>> {
    let sessions = state
        .sessions
        .list(query.user_id.as_deref(), query.skip, query.limit)?;
    Ok(Json(sessions))
}

/// GET /api/v1/sessions/{session_id}
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let session = state
        .sessions
        .get(&session_id)?
        .ok_or_else(|| ApiError::not_found(format!("session not found: {session_id}")))?;
    Ok(Json(session))
}

/// PATCH|PUT /api/v1/sessions/{session_id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(patch): Json<SessionPatch>,
) -> ApiResult<Json<Session>> {
    let session = state
        .sessions
        .update(&session_id, patch)?
        .ok_or_else(|| ApiError::not_found(format!("session not found: {session_id}")))?;
    Ok(Json(session))
}

/// DELETE /api/v1/sessions/{session_id} — cascades to the whole subgraph.
pub async fn delete_one(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    if !state.sessions.delete(&session_id)? {
        return Err(ApiError::not_found(format!("session not found: {session_id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/sessions/{session_id}/with-nodes
pub async fn with_nodes(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionWithNodes>> {
    let combined = state
        .sessions
        .with_nodes(&session_id)?
        .ok_or_else(|| ApiError::not_found(format!("session not found: {session_id}")))?;
    Ok(Json(combined))
}

/// GET /api/v1/sessions/{session_id}/nodes
pub async fn nodes(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<Node>>> {
    state
        .sessions
        .get(&session_id)?
        .ok_or_else(|| ApiError::not_found(format!("session not found: {session_id}")))?;
    Ok(Json(state.sessions.nodes(&session_id)?))
}

/// POST /api/v1/sessions/{session_id}/nodes — create a node, announce it,
/// and kick off the parent auto-summary when applicable.
pub async fn create_node(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(body): Json<NewNode>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    state
        .sessions
        .get(&session_id)?
        .ok_or_else(|| ApiError::not_found(format!("session not found: {session_id}")))?;

    let parent_id = body.parent_id.clone();
    let node = state.nodes.create(&session_id, body)?;

    state.hub.broadcast(
        &session_id,
        &ServerEvent::NodeCreated {
            session_id: session_id.clone(),
            node: node.clone(),
        },
        None,
    );
    if let Some(parent_id) = parent_id {
        state.summaries.spawn_parent_summary(parent_id);
    }

    Ok((StatusCode::CREATED, Json(node)))
}
