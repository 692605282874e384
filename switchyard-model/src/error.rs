use thiserror::Error;

/// Errors produced by model constructors and parsers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("malformed scheduler bucket key: {0:?}")]
    InvalidBucket(String),

    #[error("unknown outbox event type: {0:?}")]
    UnknownEventType(String),

    #[error("unknown {kind} value: {value:?}")]
    UnknownVariant { kind: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;
