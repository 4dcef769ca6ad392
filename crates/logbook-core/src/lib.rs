//! Logbook Core Library
//!
//! Ingestion and analysis for script and agent execution logs, on top of
//! `logbook-store`.
//!
//! ## Key Components
//!
//! - `LogSink`: non-blocking batching writer with disk buffering and replay
//! - `SearchService`: BM25 search with structured filters
//! - `RelationshipExtractor`: causality edges between consecutive events
//! - `MemoryService`: keyword-searchable agent learnings
//! - `ExecutionManager`: scoped runs, execution graphs, summaries, pruning

pub mod config;
pub mod error;
pub mod execution;
pub mod memory;
pub mod obs;
pub mod relationships;
pub mod search;
pub mod sink;
pub mod telemetry;

pub use config::SinkConfig;
pub use error::{LogbookError, Result};

pub use sink::{
    default_sink, enforce_quota, init_default_sink, ConnectionState, DiskBuffer, FlushOutcome,
    HealthReport, LogRecord, LogSink, QuotaOutcome, ReplayReport, RetryPolicy, SinkLayer,
    SinkStats, FALLBACK_TARGET,
};

pub use search::{
    normalize_error_message, parse_time_range, ErrorPattern, Resolution, SearchFilters, SearchHit,
    SearchService,
};

pub use relationships::{
    extract_relationships, ExtractionOutcome, RelatedEvent, Relationship, RelationshipExtractor,
    RelationshipRule, RULES,
};

pub use memory::{AccessPreview, MemoryHit, MemoryService, MemoryStats};

pub use execution::{
    generate_execution_id, ErrorEntry, ExecutionContext, ExecutionGraph, ExecutionManager,
    ExecutionSummary, GraphEdge, GraphMetadata, GraphNode, PruneCriteria, PruneReport,
};

pub use logbook_store::{
    AgentLearning, CausalityEdge, DbConfig, Direction, EdgeType, LogEvent, LogLevel, RunStatus,
    ScriptRun, SurrealHandle,
};
