//! Post-run summary of an execution.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use logbook_store::{AgentLearning, LogEvent, ScriptRun};
use serde::Serialize;

/// Error events listed in a summary.
pub const SUMMARY_ERROR_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub function: Option<String>,
}

impl From<LogEvent> for ErrorEntry {
    fn from(event: LogEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            message: event.message,
            function: event.function_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub run_info: ScriptRun,
    /// Event count per level name, e.g. `{"ERROR": 1, "INFO": 3}`
    pub log_statistics: BTreeMap<String, u64>,
    /// Newest ERROR/CRITICAL events first
    pub errors: Vec<ErrorEntry>,
    pub learnings: Vec<AgentLearning>,
    pub total_logs: u64,
}
