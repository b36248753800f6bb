use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Malformed provider response: {0}")]
    Parse(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AdapterError::Timeout {
                ms: arbor_core::config::LLM_REQUEST_TIMEOUT_SECS * 1000,
            }
        } else {
            AdapterError::Http(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
