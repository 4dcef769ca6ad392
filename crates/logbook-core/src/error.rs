//! Error types for logbook-core.

use logbook_store::StoreError;

/// Errors produced by the log services.
#[derive(Debug, thiserror::Error)]
pub enum LogbookError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("buffer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    #[error("execution {execution_id} is {status}, expected running")]
    InvalidRunState { execution_id: String, status: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("default sink already initialised")]
    SinkAlreadyInitialised,
}

/// Result type for logbook-core operations.
pub type Result<T> = std::result::Result<T, LogbookError>;
