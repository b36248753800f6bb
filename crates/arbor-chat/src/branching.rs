//! Post-reply branch analysis — asks the LLM for follow-up branches and
//! persists them as first-class recommendation entities.

use std::sync::Arc;

use tracing::{info, warn};

use arbor_agent::{ChatMessage, LlmAdapter};
use arbor_graph::types::{BranchRecommendation, RecommendationBatch, RecommendationSeed};
use arbor_graph::RecommendationRepo;

/// Analysis runs cooler than chat so the proposals stay consistent.
const ANALYSIS_TEMPERATURE: f32 = 0.3;
/// Default priority of the first proposal; each later one drops by 0.1.
const BASE_PRIORITY: f64 = 0.8;
const PRIORITY_STEP: f64 = 0.1;
const DEFAULT_DEPTH: i64 = 3;
/// Edge labels are capped at 20 characters.
const EDGE_LABEL_MAX: usize = 20;

#[derive(Clone)]
pub struct BranchAnalyzer {
    recommendations: RecommendationRepo,
    llm: Arc<dyn LlmAdapter>,
}

impl BranchAnalyzer {
    pub fn new(recommendations: RecommendationRepo, llm: Arc<dyn LlmAdapter>) -> Self {
        Self {
            recommendations,
            llm,
        }
    }

    /// Analyse the finished exchange and persist up to three proposals tied
    /// to the assistant message. Any failure degrades to an empty list —
    /// branch analysis never fails a chat turn.
    pub async fn analyze_and_store(
        &self,
        conversation: &[ChatMessage],
        session_id: &str,
        node_id: &str,
        message_id: &str,
    ) -> Vec<BranchRecommendation> {
        let suggestions = match self
            .llm
            .analyze_branches(conversation, ANALYSIS_TEMPERATURE)
            .await
        {
            Ok(suggestions) => suggestions,
            Err(e) => {
                warn!(node_id, error = %e, "branch analysis failed");
                return Vec::new();
            }
        };
        if suggestions.is_empty() {
            return Vec::new();
        }

        let seeds: Vec<RecommendationSeed> = suggestions
            .into_iter()
            .enumerate()
            .map(|(idx, suggestion)| RecommendationSeed {
                edge_label: suggestion.title.chars().take(EDGE_LABEL_MAX).collect(),
                priority: suggestion
                    .priority
                    .unwrap_or(BASE_PRIORITY - PRIORITY_STEP * idx as f64),
                estimated_depth: suggestion.estimated_depth.unwrap_or(DEFAULT_DEPTH),
                title: suggestion.title,
                description: suggestion.description,
                rec_type: suggestion.branch_type.as_str().to_string(),
            })
            .collect();

        match self.recommendations.create_batch(RecommendationBatch {
            session_id: session_id.to_string(),
            node_id: node_id.to_string(),
            message_id: message_id.to_string(),
            recommendations: seeds,
        }) {
            Ok(created) => {
                info!(node_id, count = created.len(), "branch recommendations stored");
                created
            }
            Err(e) => {
                warn!(node_id, error = %e, "storing branch recommendations failed");
                Vec::new()
            }
        }
    }
}
