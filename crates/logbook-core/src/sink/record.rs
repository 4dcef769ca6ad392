//! Caller-facing log record builder.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use logbook_store::{new_record_key, LogEvent, LogLevel, UNKNOWN_EXECUTION};

/// What a caller hands to [`crate::sink::LogSink::write`].
///
/// Everything except level and message is optional; missing execution
/// and script identifiers become `"unknown"` when the record is turned
/// into a [`LogEvent`].
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub execution_id: Option<String>,
    pub script_name: Option<String>,
    pub function_name: Option<String>,
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
    pub extra_data: serde_json::Map<String, serde_json::Value>,
    pub tags: BTreeSet<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            execution_id: None,
            script_name: None,
            function_name: None,
            file_path: None,
            line_number: None,
            extra_data: serde_json::Map::new(),
            tags: BTreeSet::new(),
            timestamp: None,
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Critical, message)
    }

    pub fn with_execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_script(mut self, script_name: impl Into<String>) -> Self {
        self.script_name = Some(script_name.into());
        self
    }

    pub fn with_function(mut self, function_name: impl Into<String>) -> Self {
        self.function_name = Some(function_name.into());
        self
    }

    pub fn with_location(mut self, file_path: impl Into<String>, line_number: u32) -> Self {
        self.file_path = Some(file_path.into());
        self.line_number = Some(line_number);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra_data.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Stamp the record and assign its storage id.
    pub fn into_event(self) -> LogEvent {
        LogEvent {
            id: new_record_key(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            level: self.level,
            message: self.message,
            execution_id: self
                .execution_id
                .unwrap_or_else(|| UNKNOWN_EXECUTION.to_string()),
            script_name: self
                .script_name
                .unwrap_or_else(|| UNKNOWN_EXECUTION.to_string()),
            function_name: self.function_name,
            file_path: self.file_path,
            line_number: self.line_number,
            extra_data: self.extra_data,
            tags: self.tags,
        }
    }
}
