//! The conversational core: context assembly, summary generation, branch
//! analysis, and the chat turn pipeline that ties them to the LLM adapter
//! and the session hub.

pub mod branching;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod summary;

pub use branching::BranchAnalyzer;
pub use context::{ContextAssembler, ConversationHistory};
pub use error::ChatError;
pub use pipeline::{ChatOutcome, ChatPipeline};
pub use summary::SummaryEngine;
