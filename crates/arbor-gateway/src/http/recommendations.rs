//! Branch-recommendation resource handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use arbor_graph::types::{
    BranchRecommendation, NewRecommendation, RecommendationBatch, RecommendationPatch,
    RecommendationStatus,
};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: Option<RecommendationStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBranchQuery {
    pub created_branch_id: String,
}

/// POST /api/v1/recommendations
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewRecommendation>,
) -> ApiResult<(StatusCode, Json<BranchRecommendation>)> {
    let recommendation = state.recommendations.create(body)?;
    Ok((StatusCode::CREATED, Json(recommendation)))
}

/// POST /api/v1/recommendations/batch
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RecommendationBatch>,
) -> ApiResult<(StatusCode, Json<Vec<BranchRecommendation>>)> {
    let created = state.recommendations.create_batch(body)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/recommendations/{recommendation_id}
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(recommendation_id): Path<String>,
) -> ApiResult<Json<BranchRecommendation>> {
    let recommendation = state.recommendations.get(&recommendation_id)?.ok_or_else(|| {
        ApiError::not_found(format!("recommendation not found: {recommendation_id}"))
    })?;
    Ok(Json(recommendation))
}

/// GET /api/v1/recommendations/message/{message_id}
pub async fn by_message(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
) -> ApiResult<Json<Vec<BranchRecommendation>>> {
    Ok(Json(state.recommendations.list_by_message(&message_id)?))
}

/// GET /api/v1/recommendations/node/{node_id}?status=
pub async fn by_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<Vec<BranchRecommendation>>> {
    Ok(Json(state.recommendations.list_by_node(&node_id, query.status)?))
}

/// GET /api/v1/recommendations/session/{session_id} — grouped by node,
/// expired excluded.
pub async fn by_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<BTreeMap<String, Vec<BranchRecommendation>>>> {
    Ok(Json(state.recommendations.list_active_by_session(&session_id)?))
}

/// PATCH /api/v1/recommendations/{recommendation_id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(recommendation_id): Path<String>,
    Json(patch): Json<RecommendationPatch>,
) -> ApiResult<Json<BranchRecommendation>> {
    Ok(Json(state.recommendations.update(&recommendation_id, patch)?))
}

/// POST /api/v1/recommendations/{recommendation_id}/create-branch?created_branch_id=
pub async fn create_branch(
    State(state): State<Arc<AppState>>,
    Path(recommendation_id): Path<String>,
    Query(query): Query<CreateBranchQuery>,
) -> ApiResult<Json<BranchRecommendation>> {
    if query.created_branch_id.trim().is_empty() {
        return Err(ApiError::Validation("created_branch_id must not be empty".into()));
    }
    Ok(Json(state
        .recommendations
        .mark_created(&recommendation_id, &query.created_branch_id)?))
}

/// POST /api/v1/recommendations/{recommendation_id}/dismiss
pub async fn dismiss(
    State(state): State<Arc<AppState>>,
    Path(recommendation_id): Path<String>,
) -> ApiResult<Json<BranchRecommendation>> {
    Ok(Json(state.recommendations.mark_dismissed(&recommendation_id)?))
}
