//! Logger bound to one execution.

use std::panic::Location;

use logbook_store::{AgentLearning, LogLevel};
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::memory::MemoryService;
use crate::obs;
use crate::sink::{LogRecord, LogSink};

/// Learning type used by [`ExecutionContext::log_agent_learning`].
pub const AGENT_LEARNING_TYPE: &str = "learning";

/// Handle passed into an execution scope.
///
/// Every record written through it carries the execution id and script
/// name, plus the caller's file and line. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    execution_id: String,
    script_name: String,
    sink: LogSink,
    memory: MemoryService,
    span: tracing::Span,
}

impl ExecutionContext {
    pub(crate) fn new(
        execution_id: String,
        script_name: String,
        sink: LogSink,
        memory: MemoryService,
    ) -> Self {
        let span = obs::execution_span(&execution_id, &script_name);
        Self {
            execution_id,
            script_name,
            sink,
            memory,
            span,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// Span carrying `execution_id`/`script_name` for `tracing` users.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Bind this execution onto a record and write it.
    pub fn write(&self, record: LogRecord) {
        self.sink.write(
            record
                .with_execution(self.execution_id.clone())
                .with_script(self.script_name.clone()),
        );
    }

    #[track_caller]
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let caller = Location::caller();
        self.write(LogRecord::new(level, message).with_location(caller.file(), caller.line()));
    }

    /// Log with extra attributes.
    #[track_caller]
    pub fn log_with(&self, level: LogLevel, message: impl Into<String>, extra: Map<String, Value>) {
        let caller = Location::caller();
        let mut record = LogRecord::new(level, message).with_location(caller.file(), caller.line());
        record.extra_data = extra;
        self.write(record);
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    #[track_caller]
    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    #[track_caller]
    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    #[track_caller]
    pub fn critical(&self, message: impl Into<String>) {
        self.log(LogLevel::Critical, message);
    }

    /// Record an agent learning scoped to this execution.
    pub async fn log_agent_learning(
        &self,
        message: &str,
        function_name: &str,
        context: Map<String, Value>,
        confidence: f64,
    ) -> Result<AgentLearning> {
        let mut metadata = learning_metadata(&self.execution_id, function_name, context, confidence);
        metadata.insert("script_name".into(), json!(self.script_name));
        self.memory
            .add(message, AGENT_LEARNING_TYPE, metadata)
            .await
    }
}

pub(crate) fn learning_metadata(
    execution_id: &str,
    function_name: &str,
    context: Map<String, Value>,
    confidence: f64,
) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("execution_id".into(), json!(execution_id));
    metadata.insert("function_name".into(), json!(function_name));
    metadata.insert("confidence".into(), json!(confidence));
    metadata.insert("context".into(), Value::Object(context));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learning_metadata_scopes_execution() {
        let mut context = Map::new();
        context.insert("table".into(), json!("users"));
        let metadata = learning_metadata("exec-1", "load", context, 0.9);
        assert_eq!(metadata["execution_id"], json!("exec-1"));
        assert_eq!(metadata["function_name"], json!("load"));
        assert_eq!(metadata["confidence"], json!(0.9));
        assert_eq!(metadata["context"]["table"], json!("users"));
    }
}
