//! Logbook-Store: SurrealDB Backend for Logbook
//!
//! This crate provides the persistence layer for the execution log backend.
//! It handles all I/O with SurrealDB: schema provisioning, bulk ingestion of
//! log events, script run bookkeeping, agent learnings, causality edges and
//! retention pruning.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: Schema integrity, idempotent writes, and graph traversal.
//!
//! ## Key Components
//!
//! - `SurrealHandle`: Manages the connection; query methods per table
//! - `ensure_schema`: Idempotent provisioning of tables, indexes, view and graph
//! - `IsolatedDatabase`: Throwaway, fully provisioned databases for tests
//! - `LogStore`: Ingestion seam used by the log sink

mod edges;
mod error;
mod events;
pub mod fakes;
mod handle;
mod isolation;
mod learnings;
pub mod migrations;
mod retention;
mod runs;
mod schema;
pub mod storage_traits;
mod surreal_store;

pub use edges::{Direction, EdgeDraft};
pub use error::StoreError;
pub use events::{EventQuery, ScoredEvent};
pub use handle::{DbConfig, SurrealHandle, DEFAULT_DATABASE, DEFAULT_NAMESPACE};
pub use isolation::{
    drop_database, isolated_database_name, new_isolated_database, with_isolated_database,
    IsolatedDatabase,
};
pub use learnings::LearningStats;
pub use migrations::{ensure_schema, SchemaReport};
pub use retention::{PruneCounts, RetentionFilter, TableCounts};
pub use schema::{
    new_record_key, parse_record_id, record_id, record_key, render_record_id, AgentLearning,
    CausalityEdge, EdgeType, LogEvent, LogLevel, RunStatus, ScriptRun, AGENT_LEARNINGS,
    LOG_CAUSALITY, LOG_EVENTS, LOG_EVENTS_VIEW, LOG_RELATIONSHIPS, SCRIPT_RUNS, UNKNOWN_EXECUTION,
};
pub use storage_traits::{LogStore, StorageResult};
pub use surrealdb::sql::Thing;

/// Result type for logbook-store operations
pub type Result<T> = std::result::Result<T, StoreError>;
