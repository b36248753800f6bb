use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use arbor_agent::LlmAdapter;
use arbor_chat::{BranchAnalyzer, ChatPipeline, ContextAssembler, SummaryEngine};
use arbor_core::config::ArborConfig;
use arbor_graph::{GraphStore, MessageRepo, NodeRepo, RecommendationRepo, SessionRepo};
use arbor_hub::SessionHub;

/// Central shared state — passed as `Arc<AppState>` to every handler.
///
/// Explicit construction at boot: the store fans out into repositories,
/// those into the assembler/engines, and everything meets in the pipeline.
pub struct AppState {
    pub config: ArborConfig,
    pub sessions: SessionRepo,
    pub nodes: NodeRepo,
    pub messages: MessageRepo,
    pub recommendations: RecommendationRepo,
    pub assembler: ContextAssembler,
    pub summaries: SummaryEngine,
    pub pipeline: ChatPipeline,
    pub hub: Arc<SessionHub>,
}

impl AppState {
    pub fn new(config: ArborConfig, store: Arc<GraphStore>, llm: Arc<dyn LlmAdapter>) -> Self {
        let sessions = SessionRepo::new(Arc::clone(&store));
        let nodes = NodeRepo::new(Arc::clone(&store));
        let messages = MessageRepo::new(Arc::clone(&store));
        let recommendations = RecommendationRepo::new(Arc::clone(&store));
        let hub = Arc::new(SessionHub::new());

        let assembler = ContextAssembler::new(nodes.clone(), messages.clone());
        let summaries = SummaryEngine::new(
            nodes.clone(),
            messages.clone(),
            Arc::clone(&llm),
            Arc::clone(&hub),
        );
        let analyzer = BranchAnalyzer::new(recommendations.clone(), Arc::clone(&llm));
        let pipeline = ChatPipeline::new(
            nodes.clone(),
            messages.clone(),
            assembler.clone(),
            summaries.clone(),
            analyzer,
            llm,
            Arc::clone(&hub),
        );

        Self {
            config,
            sessions,
            nodes,
            messages,
            recommendations,
            assembler,
            summaries,
            pipeline,
            hub,
        }
    }
}

/// Assemble the full router: health, the v1 REST surface, and the
/// per-session WebSocket endpoint.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(crate::http::health::health))
        // Sessions
        .route(
            "/api/v1/sessions",
            post(crate::http::sessions::create).get(crate::http::sessions::list),
        )
        .route(
            "/api/v1/sessions/{session_id}",
            get(crate::http::sessions::get_one)
                .patch(crate::http::sessions::update)
                .put(crate::http::sessions::update)
                .delete(crate::http::sessions::delete_one),
        )
        .route(
            "/api/v1/sessions/{session_id}/with-nodes",
            get(crate::http::sessions::with_nodes),
        )
        .route(
            "/api/v1/sessions/{session_id}/nodes",
            get(crate::http::sessions::nodes).post(crate::http::sessions::create_node),
        )
        // Nodes
        .route("/api/v1/nodes", post(crate::http::nodes::create))
        .route("/api/v1/nodes/branch", post(crate::http::nodes::create_branches))
        .route("/api/v1/nodes/summary", post(crate::http::nodes::create_summary))
        .route("/api/v1/nodes/reference", post(crate::http::nodes::create_reference))
        .route(
            "/api/v1/nodes/delete-multiple",
            post(crate::http::nodes::delete_multiple),
        )
        .route(
            "/api/v1/nodes/delete-multiple/cascade",
            post(crate::http::nodes::delete_multiple_cascade),
        )
        .route(
            "/api/v1/nodes/{node_id}",
            get(crate::http::nodes::get_one)
                .patch(crate::http::nodes::update)
                .delete(crate::http::nodes::delete_one),
        )
        .route(
            "/api/v1/nodes/{node_id}/cascade",
            delete(crate::http::nodes::delete_cascade),
        )
        .route(
            "/api/v1/nodes/{node_id}/with-messages",
            get(crate::http::nodes::with_messages),
        )
        .route("/api/v1/nodes/{node_id}/tree", get(crate::http::nodes::tree))
        .route(
            "/api/v1/nodes/{node_id}/descendants",
            get(crate::http::nodes::descendants),
        )
        .route(
            "/api/v1/nodes/{node_id}/descendants/depth/{max_depth}",
            get(crate::http::nodes::descendants_bounded),
        )
        .route(
            "/api/v1/nodes/{node_id}/ancestors",
            get(crate::http::nodes::ancestors),
        )
        .route("/api/v1/nodes/{node_id}/path", get(crate::http::nodes::path))
        .route(
            "/api/v1/nodes/{node_id}/relations",
            get(crate::http::nodes::relations),
        )
        .route("/api/v1/nodes/{node_id}/tokens", get(crate::http::nodes::tokens))
        .route(
            "/api/v1/nodes/session/{session_id}",
            get(crate::http::nodes::by_session),
        )
        .route(
            "/api/v1/nodes/session/{session_id}/paginated",
            get(crate::http::nodes::by_session_paginated),
        )
        .route(
            "/api/v1/nodes/session/{session_id}/leaves",
            get(crate::http::nodes::leaves),
        )
        // Messages
        .route("/api/v1/messages", post(crate::http::messages::create))
        .route("/api/v1/messages/chat", post(crate::http::messages::chat))
        .route(
            "/api/v1/messages/create-branches",
            post(crate::http::messages::create_branches),
        )
        .route(
            "/api/v1/messages/history/{node_id}",
            get(crate::http::messages::history),
        )
        .route(
            "/api/v1/messages/node/{node_id}",
            get(crate::http::messages::by_node),
        )
        .route(
            "/api/v1/messages/node/{node_id}/all",
            get(crate::http::messages::by_node_all),
        )
        .route(
            "/api/v1/messages/node/{node_id}/paginated",
            get(crate::http::messages::by_node_paginated),
        )
        .route(
            "/api/v1/messages/{message_id}",
            get(crate::http::messages::get_one).delete(crate::http::messages::delete_one),
        )
        // Recommendations
        .route(
            "/api/v1/recommendations",
            post(crate::http::recommendations::create),
        )
        .route(
            "/api/v1/recommendations/batch",
            post(crate::http::recommendations::create_batch),
        )
        .route(
            "/api/v1/recommendations/message/{message_id}",
            get(crate::http::recommendations::by_message),
        )
        .route(
            "/api/v1/recommendations/node/{node_id}",
            get(crate::http::recommendations::by_node),
        )
        .route(
            "/api/v1/recommendations/session/{session_id}",
            get(crate::http::recommendations::by_session),
        )
        .route(
            "/api/v1/recommendations/{recommendation_id}",
            get(crate::http::recommendations::get_one)
                .patch(crate::http::recommendations::update),
        )
        .route(
            "/api/v1/recommendations/{recommendation_id}/create-branch",
            post(crate::http::recommendations::create_branch),
        )
        .route(
            "/api/v1/recommendations/{recommendation_id}/dismiss",
            post(crate::http::recommendations::dismiss),
        )
        // WebSocket
        .route("/ws/session/{session_id}", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_layer(config: &ArborConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
