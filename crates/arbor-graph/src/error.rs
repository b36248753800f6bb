use thiserror::Error;

/// Store-layer failure taxonomy. Every rusqlite error collapses into one of
/// these four shapes before it leaves the crate.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::not_found("record", ""),
            rusqlite::Error::SqliteFailure(err, msg) => {
                let msg = msg.unwrap_or_else(|| err.to_string());
                match err.code {
                    rusqlite::ErrorCode::ConstraintViolation => StoreError::Conflict(msg),
                    _ => StoreError::Unavailable(msg),
                }
            }
            rusqlite::Error::FromSqlConversionFailure(_, _, e) => {
                StoreError::Malformed(e.to_string())
            }
            rusqlite::Error::InvalidColumnType(_, name, ty) => {
                StoreError::Malformed(format!("column {name} has unexpected type {ty}"))
            }
            rusqlite::Error::IntegralValueOutOfRange(_, v) => {
                StoreError::Malformed(format!("integral value out of range: {v}"))
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Malformed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
