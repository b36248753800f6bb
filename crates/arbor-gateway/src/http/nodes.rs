//! Node resource handlers: CRUD, traversals, batch deletes, and the
//! summary/reference aggregate creators.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use arbor_graph::types::{
    DeleteResult, Message, NewNode, Node, NodeMetadata, NodePatch, NodeRelations, NodeTree,
    NodeType,
};
use arbor_protocol::ServerEvent;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CreateNodeRequest {
    pub session_id: String,
    #[serde(flatten)]
    pub node: NewNode,
}

#[derive(Debug, Deserialize)]
pub struct BranchSpec {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type")]
    pub node_type: Option<NodeType>,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

#[derive(Debug, Deserialize)]
pub struct BranchRequest {
    pub parent_id: String,
    pub branches: Vec<BranchSpec>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    pub node_ids: Vec<String>,
    #[serde(default)]
    pub is_manual: bool,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReferenceRequest {
    pub node_ids: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteManyRequest {
    pub node_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct NodeWithMessages {
    #[serde(flatten)]
    pub node: Node,
    pub messages: Vec<Message>,
}

/// POST /api/v1/nodes
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateNodeRequest>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    let parent_id = body.node.parent_id.clone();
    let node = state.nodes.create(&body.session_id, body.node)?;

    state.hub.broadcast(
        &body.session_id,
        &ServerEvent::NodeCreated {
            session_id: body.session_id.clone(),
            node: node.clone(),
        },
        None,
    );
    if let Some(parent_id) = parent_id {
        state.summaries.spawn_parent_summary(parent_id);
    }

    Ok((StatusCode::CREATED, Json(node)))
}

/// GET /api/v1/nodes/{node_id}
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<Node>> {
    let node = require_node(&state, &node_id)?;
    Ok(Json(node))
}

/// PATCH /api/v1/nodes/{node_id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(patch): Json<NodePatch>,
) -> ApiResult<Json<Node>> {
    let node = state
        .nodes
        .update(&node_id, patch)?
        .ok_or_else(|| ApiError::not_found(format!("node not found: {node_id}")))?;

    state.hub.broadcast(
        &node.session_id,
        &ServerEvent::NodeUpdated {
            session_id: node.session_id.clone(),
            data: node.clone(),
        },
        None,
    );
    Ok(Json(node))
}

/// DELETE /api/v1/nodes/{node_id} — children are orphaned, not removed.
pub async fn delete_one(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<StatusCode> {
    delete_and_announce(&state, vec![node_id], false).map(|_| StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/nodes/{node_id}/cascade — the node and its subtree.
pub async fn delete_cascade(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<StatusCode> {
    delete_and_announce(&state, vec![node_id], true).map(|_| StatusCode::NO_CONTENT)
}

/// POST /api/v1/nodes/delete-multiple
pub async fn delete_multiple(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeleteManyRequest>,
) -> ApiResult<Json<DeleteResult>> {
    batch_delete(&state, body, false)
}

/// POST /api/v1/nodes/delete-multiple/cascade
pub async fn delete_multiple_cascade(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeleteManyRequest>,
) -> ApiResult<Json<DeleteResult>> {
    batch_delete(&state, body, true)
}

/// POST /api/v1/nodes/branch — batch-create children under one parent.
pub async fn create_branches(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BranchRequest>,
) -> ApiResult<(StatusCode, Json<Vec<Node>>)> {
    if body.branches.is_empty() {
        return Err(ApiError::Validation("branches must not be empty".into()));
    }
    let parent = require_node(&state, &body.parent_id)?;

    let mut created = Vec::new();
    for branch in body.branches {
        let node = state.nodes.create(
            &parent.session_id,
            NewNode {
                parent_id: Some(parent.id.clone()),
                title: branch.title,
                content: branch.content,
                node_type: branch.node_type.unwrap_or(NodeType::Solution),
                summary_content: None,
                source_node_ids: None,
                metadata: branch.metadata,
            },
        )?;
        state.hub.broadcast(
            &parent.session_id,
            &ServerEvent::NodeCreated {
                session_id: parent.session_id.clone(),
                node: node.clone(),
            },
            None,
        );
        created.push(node);
    }
    state.summaries.spawn_parent_summary(parent.id.clone());

    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /api/v1/nodes/summary — placeholder now, content later.
pub async fn create_summary(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SummaryRequest>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    if body.node_ids.is_empty() {
        return Err(ApiError::Validation("node_ids must not be empty".into()));
    }
    let node = state
        .summaries
        .create_summary(&body.node_ids, body.is_manual, body.instructions)?;
    Ok((StatusCode::CREATED, Json(node)))
}

/// POST /api/v1/nodes/reference
pub async fn create_reference(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReferenceRequest>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    if body.node_ids.is_empty() {
        return Err(ApiError::Validation("node_ids must not be empty".into()));
    }
    let node = state.nodes.create_reference(
        &body.node_ids,
        body.title.as_deref(),
        body.content.as_deref(),
    )?;
    Ok((StatusCode::CREATED, Json(node)))
}

/// GET /api/v1/nodes/{node_id}/with-messages
pub async fn with_messages(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<NodeWithMessages>> {
    let node = require_node(&state, &node_id)?;
    let messages = state.messages.list_by_node(&node_id)?;
    Ok(Json(NodeWithMessages { node, messages }))
}

/// GET /api/v1/nodes/{node_id}/tree
pub async fn tree(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<NodeTree>> {
    let tree = state
        .nodes
        .tree(&node_id)?
        .ok_or_else(|| ApiError::not_found(format!("node not found: {node_id}")))?;
    Ok(Json(tree))
}

/// GET /api/v1/nodes/{node_id}/descendants
pub async fn descendants(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<Vec<Node>>> {
    require_node(&state, &node_id)?;
    Ok(Json(state.nodes.descendants(&node_id, None)?))
}

/// GET /api/v1/nodes/{node_id}/descendants/depth/{max_depth}
pub async fn descendants_bounded(
    State(state): State<Arc<AppState>>,
    Path((node_id, max_depth)): Path<(String, i64)>,
) -> ApiResult<Json<Vec<Node>>> {
    if max_depth < 1 {
        return Err(ApiError::Validation("max_depth must be at least 1".into()));
    }
    require_node(&state, &node_id)?;
    Ok(Json(state.nodes.descendants(&node_id, Some(max_depth))?))
}

/// GET /api/v1/nodes/{node_id}/ancestors — root first.
pub async fn ancestors(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<Vec<Node>>> {
    require_node(&state, &node_id)?;
    Ok(Json(state.nodes.ancestors(&node_id)?))
}

/// GET /api/v1/nodes/{node_id}/path — root → self.
pub async fn path(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<Vec<Node>>> {
    let path = state.nodes.path(&node_id)?;
    if path.is_empty() {
        return Err(ApiError::not_found(format!("node not found: {node_id}")));
    }
    Ok(Json(path))
}

/// GET /api/v1/nodes/{node_id}/relations
pub async fn relations(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<NodeRelations>> {
    Ok(Json(state.nodes.relations(&node_id)?))
}

/// GET /api/v1/nodes/{node_id}/tokens — context cost at this node.
pub async fn tokens(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_node(&state, &node_id)?;
    let total = state.nodes.context_tokens(&node_id)?;
    Ok(Json(json!({ "total_tokens": total })))
}

/// GET /api/v1/nodes/session/{session_id}
pub async fn by_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<Node>>> {
    Ok(Json(state.sessions.nodes(&session_id)?))
}

/// GET /api/v1/nodes/session/{session_id}/paginated?skip=&limit=
pub async fn by_session_paginated(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    axum::extract::Query(page): axum::extract::Query<super::Page>,
) -> ApiResult<Json<Vec<Node>>> {
    Ok(Json(state.nodes.list(&session_id, page.skip, page.limit)?))
}

/// GET /api/v1/nodes/session/{session_id}/leaves
pub async fn leaves(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<Node>>> {
    Ok(Json(state.nodes.leaves(&session_id)?))
}

fn require_node(state: &AppState, node_id: &str) -> ApiResult<Node> {
    state
        .nodes
        .get(node_id)?
        .ok_or_else(|| ApiError::not_found(format!("node not found: {node_id}")))
}

fn delete_and_announce(
    state: &Arc<AppState>,
    node_ids: Vec<String>,
    cascade: bool,
) -> ApiResult<DeleteResult> {
    // Resolve the session before the rows disappear.
    let session_id = node_ids
        .iter()
        .find_map(|id| state.nodes.get(id).ok().flatten())
        .map(|n| n.session_id);

    let result = state.nodes.delete(&node_ids, cascade)?;
    if result.deleted_count == 0 && node_ids.len() == 1 {
        return Err(ApiError::not_found(format!("node not found: {}", node_ids[0])));
    }

    if let Some(session_id) = session_id {
        state.hub.broadcast(
            &session_id,
            &ServerEvent::NodesDeleted {
                session_id: session_id.clone(),
                result: result.clone(),
            },
            None,
        );
    }
    Ok(result)
}

fn batch_delete(
    state: &Arc<AppState>,
    body: DeleteManyRequest,
    cascade: bool,
) -> ApiResult<Json<DeleteResult>> {
    if body.node_ids.is_empty() {
        return Err(ApiError::Validation("node_ids must not be empty".into()));
    }
    // Batch deletes surface partial success instead of failing.
    let session_id = body
        .node_ids
        .iter()
        .find_map(|id| state.nodes.get(id).ok().flatten())
        .map(|n| n.session_id);
    let result = state.nodes.delete(&body.node_ids, cascade)?;
    if let Some(session_id) = session_id {
        state.hub.broadcast(
            &session_id,
            &ServerEvent::NodesDeleted {
                session_id: session_id.clone(),
                result: result.clone(),
            },
            None,
        );
    }
    Ok(Json(result))
}
