//! Record definitions for the Logbook SurrealDB tables
//!
//! Tables:
//! - log_events: Structured log lines emitted by scripts and agents
//! - script_runs: One row per execution (lifecycle + outcome)
//! - agent_learnings: Free-text observations recorded by agents
//! - log_causality: Relation table linking events (and learnings)
//!
//! The public types here carry chrono timestamps and serialize to plain JSON.
//! Row types used on the wire to SurrealDB live next to the queries that use
//! them and convert through the `surreal_datetime` adapters below.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::{Id, Thing};
use uuid::Uuid;

/// Table holding every ingested log line
pub const LOG_EVENTS: &str = "log_events";
/// Table holding one row per execution
pub const SCRIPT_RUNS: &str = "script_runs";
/// Table holding agent learnings
pub const AGENT_LEARNINGS: &str = "agent_learnings";
/// Relation table for causality edges
pub const LOG_CAUSALITY: &str = "log_causality";
/// Named graph spanning events, learnings and causality edges
pub const LOG_RELATIONSHIPS: &str = "log_relationships";
/// Search view over `log_events`
pub const LOG_EVENTS_VIEW: &str = "log_events_view";

/// Execution id used when a record is written outside any execution
pub const UNKNOWN_EXECUTION: &str = "unknown";

/// Module for serializing chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Build a record id for `table` with a string key.
pub fn record_id(table: &str, key: &str) -> Thing {
    Thing::from((table, key))
}

/// Extract the string key of a record id written by this crate.
pub fn record_key(thing: &Thing) -> String {
    match &thing.id {
        Id::String(key) => key.clone(),
        other => other.to_string(),
    }
}

/// Fresh random record key
pub fn new_record_key() -> String {
    Uuid::new_v4().simple().to_string()
}

// ---------------------------------------------------------------------------
// Log events
// ---------------------------------------------------------------------------

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Success,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub const ALL: [LogLevel; 7] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Success,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// ERROR and CRITICAL events are surfaced in execution summaries.
    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "SUCCESS" => Ok(LogLevel::Success),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" | "FATAL" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// A single structured log line.
///
/// This is also the shape of every line in a disk buffer file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Record key in `log_events`, assigned at creation so replays stay idempotent
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub execution_id: String,
    pub script_name: String,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub extra_data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl LogEvent {
    /// Create an event stamped now, outside any execution.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: new_record_key(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            execution_id: UNKNOWN_EXECUTION.to_string(),
            script_name: UNKNOWN_EXECUTION.to_string(),
            function_name: None,
            file_path: None,
            line_number: None,
            extra_data: serde_json::Map::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_execution(
        mut self,
        execution_id: impl Into<String>,
        script_name: impl Into<String>,
    ) -> Self {
        self.execution_id = execution_id.into();
        self.script_name = script_name.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra_data.insert(key.into(), value);
        self
    }

    /// Record id of this event in `log_events`.
    pub fn record_id(&self) -> Thing {
        record_id(LOG_EVENTS, &self.id)
    }
}

// ---------------------------------------------------------------------------
// Script runs
// ---------------------------------------------------------------------------

/// Lifecycle status of a script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// One execution of a script or agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRun {
    pub execution_id: String,
    pub script_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub duration_seconds: Option<f64>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub pid: u32,
    pub hostname: String,
}

impl ScriptRun {
    /// New run in `running` state, stamped now.
    pub fn start(
        execution_id: impl Into<String>,
        script_name: impl Into<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            script_name: script_name.into(),
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Running,
            duration_seconds: None,
            error: None,
            metadata,
            pid: std::process::id(),
            hostname: hostname(),
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

// ---------------------------------------------------------------------------
// Agent learnings
// ---------------------------------------------------------------------------

/// A free-text observation recorded by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLearning {
    /// Record key in `agent_learnings`
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub learning_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl AgentLearning {
    pub fn new(
        content: impl Into<String>,
        learning_type: impl Into<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: new_record_key(),
            content: content.into(),
            learning_type: learning_type.into(),
            timestamp: Utc::now(),
            metadata,
            access_count: 0,
            last_accessed: None,
        }
    }

    /// Execution this learning is scoped to, if any.
    pub fn execution_id(&self) -> Option<&str> {
        self.metadata.get("execution_id").and_then(|v| v.as_str())
    }

    pub fn record_id(&self) -> Thing {
        record_id(AGENT_LEARNINGS, &self.id)
    }
}

// ---------------------------------------------------------------------------
// Causality edges
// ---------------------------------------------------------------------------

/// Kind of relationship between two events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    RetryOf,
    FixedBy,
    CausedBy,
    FollowedBy,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::RetryOf => "RETRY_OF",
            EdgeType::FixedBy => "FIXED_BY",
            EdgeType::CausedBy => "CAUSED_BY",
            EdgeType::FollowedBy => "FOLLOWED_BY",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RETRY_OF" => Ok(EdgeType::RetryOf),
            "FIXED_BY" => Ok(EdgeType::FixedBy),
            "CAUSED_BY" => Ok(EdgeType::CausedBy),
            "FOLLOWED_BY" => Ok(EdgeType::FollowedBy),
            other => Err(format!("unknown edge type: {other}")),
        }
    }
}

/// Directed edge in `log_causality`.
///
/// `from` and `to` are full record ids rendered as `table:key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalityEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub edge_type: EdgeType,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    pub source_text: String,
    pub target_text: String,
}

/// Render a record id as `table:key` without escaping.
pub fn render_record_id(thing: &Thing) -> String {
    format!("{}:{}", thing.tb, record_key(thing))
}

/// Parse `table:key` back into a record id.
pub fn parse_record_id(s: &str) -> Option<Thing> {
    let (table, key) = s.split_once(':')?;
    if table.is_empty() || key.is_empty() {
        return None;
    }
    Some(record_id(table, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_wire_names() {
        assert_eq!(
            serde_json::to_value(LogLevel::Warning).unwrap(),
            serde_json::json!("WARNING")
        );
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_event_defaults_to_unknown_execution() {
        let event = LogEvent::new(LogLevel::Info, "hello");
        assert_eq!(event.execution_id, UNKNOWN_EXECUTION);
        assert_eq!(event.script_name, UNKNOWN_EXECUTION);
        assert_eq!(event.id.len(), 32);
    }

    #[test]
    fn test_log_event_buffer_line_tolerates_missing_optionals() {
        let line = r#"{"id":"abc","timestamp":"2024-01-01T00:00:00Z","level":"ERROR","message":"boom","execution_id":"e1","script_name":"s"}"#;
        let event: LogEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.level, LogLevel::Error);
        assert!(event.tags.is_empty());
        assert!(event.extra_data.is_empty());
    }

    #[test]
    fn test_record_id_render_and_parse() {
        let thing = record_id(LOG_EVENTS, "0abc");
        assert_eq!(render_record_id(&thing), "log_events:0abc");
        let parsed = parse_record_id("log_events:0abc").unwrap();
        assert_eq!(parsed, thing);
        assert!(parse_record_id("no-colon").is_none());
    }

    #[test]
    fn test_edge_type_wire_names() {
        assert_eq!(
            serde_json::to_value(EdgeType::RetryOf).unwrap(),
            serde_json::json!("RETRY_OF")
        );
        assert_eq!("FOLLOWED_BY".parse::<EdgeType>().unwrap(), EdgeType::FollowedBy);
    }

    #[test]
    fn test_learning_execution_scope() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("execution_id".into(), serde_json::json!("run-1"));
        let learning = AgentLearning::new("retry helps", "insight", metadata);
        assert_eq!(learning.execution_id(), Some("run-1"));
    }
}
