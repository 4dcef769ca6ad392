//! Error types for logbook-store

use thiserror::Error;

/// Errors that can occur in the log persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Transaction failed
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Script run not found
    #[error("Script run not found: {execution_id}")]
    RunNotFound { execution_id: String },

    /// Script run is not in the expected state
    #[error("Script run {execution_id} is {status}, expected running")]
    RunNotRunning {
        execution_id: String,
        status: String,
    },

    /// Backend refused the write (used by fakes to simulate outages)
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
