use thiserror::Error;

use arbor_agent::AdapterError;
use arbor_graph::StoreError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("LLM adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

pub type Result<T> = std::result::Result<T, ChatError>;
