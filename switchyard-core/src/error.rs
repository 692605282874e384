use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[cfg(feature = "redis")]
    #[error("Cache backend error: {0}")]
    Cache(#[from] redis::RedisError),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store operation {op} exceeded its {timeout:?} deadline")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupted cache entry {key}: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("Invalid scheduler bucket: {0}")]
    InvalidBucket(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Failures of the shared store or database that callers are expected to
    /// absorb by falling back rather than surface to the request path.
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "redis")]
            SchedulerError::Cache(_) => true,
            #[cfg(feature = "postgres")]
            SchedulerError::Database(_) => true,
            SchedulerError::Timeout { .. } | SchedulerError::Unavailable(_) => {
                true
            }
            _ => false,
        }
    }
}

impl From<switchyard_model::ModelError> for SchedulerError {
    fn from(err: switchyard_model::ModelError) -> Self {
        match err {
            switchyard_model::ModelError::InvalidBucket(raw) => {
                SchedulerError::InvalidBucket(raw)
            }
            other => SchedulerError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
