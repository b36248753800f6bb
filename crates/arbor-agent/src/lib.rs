//! LLM provider seam.
//!
//! [`adapter::LlmAdapter`] is the only polymorphic boundary the rest of the
//! system sees: non-streaming chat, chunked streaming, structured
//! summarisation, and branch analysis. `summarize` and `analyze_branches`
//! ship as default methods built on `chat`, so a provider only has to speak
//! its own completion API.

pub mod adapter;
pub mod error;
pub mod gemini;
pub mod json;
pub mod mock;
pub mod prompt;
pub mod stream;

use std::sync::Arc;

use tracing::{info, warn};

use arbor_core::config::ArborConfig;

pub use adapter::{BranchSuggestion, BranchType, ChatMessage, ChatResponse, ChatRole, LlmAdapter, SummaryOutput};
pub use error::AdapterError;
pub use stream::StreamEvent;

/// Pick the adapter for this deployment: the real provider when an API key
/// is configured, the deterministic mock otherwise. The pipeline is
/// oblivious to which one it got.
pub fn adapter_from_config(config: &ArborConfig) -> Arc<dyn LlmAdapter> {
    match &config.llm_api_key {
        Some(key) if !key.trim().is_empty() => {
            info!(model = %config.llm_model, "using Gemini adapter");
            Arc::new(gemini::GeminiAdapter::new(key.clone(), config.llm_model.clone()))
        }
        _ => {
            warn!("LLM_API_KEY not set, falling back to mock adapter");
            Arc::new(mock::MockAdapter::default())
        }
    }
}
