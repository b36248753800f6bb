//! Message resource handlers, plus the non-streaming chat endpoint and
//! recommendation-driven branch creation.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use arbor_graph::types::{Message, Metadata, NewMessage, NewNode, NodeMetadata, NodeType};
use arbor_protocol::events::ChatTurn;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub session_id: String,
    pub node_id: String,
    pub message: String,
    #[serde(default = "default_true")]
    pub auto_branch: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_true")]
    pub include_ancestors: bool,
}

#[derive(Debug, Deserialize)]
pub struct RecommendedBranchSpec {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub node_type: Option<NodeType>,
    #[serde(default)]
    pub recommendation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBranchesRequest {
    pub parent_node_id: String,
    pub branches: Vec<RecommendedBranchSpec>,
    #[serde(default)]
    pub edge_labels: Metadata,
}

fn default_true() -> bool {
    true
}

/// POST /api/v1/messages
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewMessage>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    if body.content.trim().is_empty() {
        return Err(ApiError::Validation("content must not be empty".into()));
    }
    let message = state.messages.create(body)?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/v1/messages/{message_id}
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
) -> ApiResult<Json<Message>> {
    let message = state
        .messages
        .get(&message_id)?
        .ok_or_else(|| ApiError::not_found(format!("message not found: {message_id}")))?;
    Ok(Json(message))
}

/// GET /api/v1/messages/node/{node_id}?skip=&limit=
pub async fn by_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Query(page): Query<super::Page>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.messages.list_by_node_paginated(
        &node_id, page.skip, page.limit,
    )?))
}

/// GET /api/v1/messages/node/{node_id}/all
pub async fn by_node_all(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.messages.list_by_node(&node_id)?))
}

/// GET /api/v1/messages/node/{node_id}/paginated?skip=&limit=
pub async fn by_node_paginated(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Query(page): Query<super::Page>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.messages.list_by_node_paginated(
        &node_id, page.skip, page.limit,
    )?))
}

/// GET /api/v1/messages/history/{node_id}?include_ancestors=
///
/// The assembled conversation context for a node, exactly as the chat
/// pipeline would see it.
pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let history = state.assembler.assemble(&node_id, query.include_ancestors)?;
    Ok(Json(history.messages))
}

/// DELETE /api/v1/messages/{message_id}
pub async fn delete_one(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
) -> ApiResult<StatusCode> {
    if !state.messages.delete(&message_id)? {
        return Err(ApiError::not_found(format!("message not found: {message_id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/messages/chat — non-streaming chat turn.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatRequestBody>,
) -> ApiResult<Json<ChatTurn>> {
    if body.message.trim().is_empty() {
        return Err(ApiError::Validation("message must not be empty".into()));
    }
    let outcome = state
        .pipeline
        .chat(&body.session_id, &body.node_id, &body.message, body.auto_branch)
        .await?;
    Ok(Json(outcome.turn))
}

/// POST /api/v1/messages/create-branches — materialise recommended
/// branches as child nodes, marking their recommendations as created.
pub async fn create_branches(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBranchesRequest>,
) -> ApiResult<Json<Value>> {
    if body.branches.is_empty() {
        return Err(ApiError::Validation("branches must not be empty".into()));
    }
    let parent = state
        .nodes
        .get(&body.parent_node_id)?
        .ok_or_else(|| ApiError::not_found(format!("node not found: {}", body.parent_node_id)))?;

    let mut created = Vec::new();
    for branch in body.branches {
        let node = state.nodes.create(
            &parent.session_id,
            NewNode {
                parent_id: Some(parent.id.clone()),
                title: branch.title,
                content: branch.description.unwrap_or_default(),
                node_type: branch.node_type.unwrap_or(NodeType::Solution),
                summary_content: None,
                source_node_ids: None,
                metadata: NodeMetadata::default(),
            },
        )?;
        if let Some(recommendation_id) = &branch.recommendation_id {
            state
                .recommendations
                .mark_created(recommendation_id, &node.id)?;
        }
        created.push(node);
    }
    state.summaries.spawn_parent_summary(parent.id.clone());

    Ok(Json(json!({
        "branches": created,
        "edge_labels": body.edge_labels,
    })))
}
