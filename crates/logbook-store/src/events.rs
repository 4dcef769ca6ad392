//! `log_events` operations: bulk insert, per-execution reads and search

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use tracing::{debug, instrument, warn};

use crate::error::StoreError;
use crate::handle::SurrealHandle;
use crate::schema::{record_id, record_key, surreal_datetime, LogEvent, LogLevel, LOG_EVENTS};
use crate::Result;

/// Wire row for `log_events`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DbLogEvent {
    id: Thing,
    #[serde(with = "surreal_datetime")]
    timestamp: DateTime<Utc>,
    level: String,
    message: String,
    execution_id: String,
    script_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    line_number: Option<u32>,
    #[serde(default)]
    extra_data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    tags: Vec<String>,
    /// Present only on search results
    #[serde(default, skip_serializing)]
    score: Option<f64>,
}

impl From<&LogEvent> for DbLogEvent {
    fn from(event: &LogEvent) -> Self {
        DbLogEvent {
            id: record_id(LOG_EVENTS, &event.id),
            timestamp: event.timestamp,
            level: event.level.as_str().to_string(),
            message: event.message.clone(),
            execution_id: event.execution_id.clone(),
            script_name: event.script_name.clone(),
            function_name: event.function_name.clone(),
            file_path: event.file_path.clone(),
            line_number: event.line_number,
            extra_data: event.extra_data.clone(),
            tags: event.tags.iter().cloned().collect(),
            score: None,
        }
    }
}

impl DbLogEvent {
    fn into_log_event(self) -> Result<LogEvent> {
        let level = self
            .level
            .parse::<LogLevel>()
            .map_err(StoreError::Serialization)?;
        Ok(LogEvent {
            id: record_key(&self.id),
            timestamp: self.timestamp,
            level,
            message: self.message,
            execution_id: self.execution_id,
            script_name: self.script_name,
            function_name: self.function_name,
            file_path: self.file_path,
            line_number: self.line_number,
            extra_data: self.extra_data,
            tags: self.tags.into_iter().collect(),
        })
    }

    fn into_scored(self) -> Result<ScoredEvent> {
        let score = self.score.unwrap_or(1.0);
        Ok(ScoredEvent {
            event: self.into_log_event()?,
            score,
        })
    }
}

/// A log event with its relevance score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEvent {
    pub event: LogEvent,
    pub score: f64,
}

/// Structured query over `log_events`
///
/// `text` drives BM25 ranking; every other field is an exact-match filter.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub text: Option<String>,
    pub level: Option<LogLevel>,
    pub script_name: Option<String>,
    pub execution_id: Option<String>,
    /// Every tag listed must be present on the event
    pub tags: Vec<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl EventQuery {
    fn has_text(&self) -> bool {
        self.text.as_deref().map(|t| !t.trim().is_empty()).unwrap_or(false)
    }

    /// Render SurrealQL plus its bindings.
    pub(crate) fn to_surql(&self) -> (String, Vec<(String, serde_json::Value)>) {
        let mut clauses = Vec::new();
        let mut binds: Vec<(String, serde_json::Value)> = Vec::new();

        if self.has_text() {
            clauses.push("message @1@ $query".to_string());
            binds.push(("query".into(), self.text.clone().unwrap_or_default().into()));
        }
        if let Some(level) = self.level {
            clauses.push("level = $level".to_string());
            binds.push(("level".into(), level.as_str().into()));
        }
        if let Some(script) = &self.script_name {
            clauses.push("script_name = $script_name".to_string());
            binds.push(("script_name".into(), script.clone().into()));
        }
        if let Some(execution_id) = &self.execution_id {
            clauses.push("execution_id = $execution_id".to_string());
            binds.push(("execution_id".into(), execution_id.clone().into()));
        }
        if !self.tags.is_empty() {
            clauses.push("tags CONTAINSALL $tags".to_string());
            binds.push(("tags".into(), self.tags.clone().into()));
        }
        if let Some(start) = self.start {
            clauses.push("timestamp >= <datetime> $start".to_string());
            binds.push(("start".into(), start.to_rfc3339().into()));
        }
        if let Some(end) = self.end {
            clauses.push("timestamp <= <datetime> $end".to_string());
            binds.push(("end".into(), end.to_rfc3339().into()));
        }

        let projection = if self.has_text() {
            "*, search::score(1) AS score"
        } else {
            "*"
        };
        let ordering = if self.has_text() {
            "score DESC, timestamp DESC"
        } else {
            "timestamp DESC"
        };
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM log_events{} ORDER BY {} LIMIT {}",
            projection,
            filter,
            ordering,
            self.limit.max(1)
        );
        (sql, binds)
    }
}

impl SurrealHandle {
    // ========== Log Event Operations ==========

    /// Bulk-insert events. Already-present ids are skipped, so a replayed
    /// batch never duplicates rows.
    #[instrument(skip(self, events), fields(count = events.len()))]
    pub async fn insert_events(&self, events: &[LogEvent]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        let rows: Vec<DbLogEvent> = events.iter().map(DbLogEvent::from).collect();

        self.db
            .query("INSERT IGNORE INTO log_events $rows")
            .bind(("rows", rows))
            .await
            .and_then(|res| res.check())
            .map_err(|e| StoreError::Transaction(e.to_string()))?;

        debug!("events inserted");
        Ok(events.len())
    }

    /// Fetch a single event by record key
    #[instrument(skip(self))]
    pub async fn get_event(&self, key: &str) -> Result<Option<LogEvent>> {
        let mut res = self
            .db
            .query("SELECT * FROM $id")
            .bind(("id", record_id(LOG_EVENTS, key)))
            .await?;
        let rows: Vec<DbLogEvent> = res.take(0)?;
        rows.into_iter()
            .next()
            .map(DbLogEvent::into_log_event)
            .transpose()
    }

    /// All events of an execution in timestamp order
    #[instrument(skip(self))]
    pub async fn events_for_execution(&self, execution_id: &str) -> Result<Vec<LogEvent>> {
        let mut res = self
            .db
            .query("SELECT * FROM log_events WHERE execution_id = $execution_id ORDER BY timestamp ASC")
            .bind(("execution_id", execution_id.to_string()))
            .await?;
        let rows: Vec<DbLogEvent> = res.take(0)?;
        rows.into_iter().map(DbLogEvent::into_log_event).collect()
    }

    /// Number of events, optionally restricted to one execution
    #[instrument(skip(self))]
    pub async fn count_events(&self, execution_id: Option<&str>) -> Result<u64> {
        let mut res = match execution_id {
            Some(id) => {
                self.db
                    .query("SELECT count() AS count FROM log_events WHERE execution_id = $execution_id GROUP ALL")
                    .bind(("execution_id", id.to_string()))
                    .await?
            }
            None => {
                self.db
                    .query("SELECT count() AS count FROM log_events GROUP ALL")
                    .await?
            }
        };
        let rows: Vec<CountRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }

    /// Event count per level for one execution
    #[instrument(skip(self))]
    pub async fn level_counts(&self, execution_id: &str) -> Result<BTreeMap<String, u64>> {
        let mut res = self
            .db
            .query("SELECT level, count() AS count FROM log_events WHERE execution_id = $execution_id GROUP BY level")
            .bind(("execution_id", execution_id.to_string()))
            .await?;
        let rows: Vec<LevelCountRow> = res.take(0)?;
        Ok(rows.into_iter().map(|r| (r.level, r.count)).collect())
    }

    /// Most recent ERROR/CRITICAL events of an execution, newest first
    #[instrument(skip(self))]
    pub async fn recent_errors(&self, execution_id: &str, limit: usize) -> Result<Vec<LogEvent>> {
        let sql = format!(
            "SELECT * FROM log_events WHERE execution_id = $execution_id AND level IN ['ERROR', 'CRITICAL'] ORDER BY timestamp DESC LIMIT {}",
            limit.max(1)
        );
        let mut res = self
            .db
            .query(sql)
            .bind(("execution_id", execution_id.to_string()))
            .await?;
        let rows: Vec<DbLogEvent> = res.take(0)?;
        rows.into_iter().map(DbLogEvent::into_log_event).collect()
    }

    /// ERROR/CRITICAL events at or after `since` across all executions,
    /// newest first
    #[instrument(skip(self))]
    pub async fn errors_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<LogEvent>> {
        let window = if since.is_some() {
            " AND timestamp >= <datetime> $since"
        } else {
            ""
        };
        let sql = format!(
            "SELECT * FROM log_events WHERE level IN ['ERROR', 'CRITICAL']{} ORDER BY timestamp DESC",
            window
        );
        let mut pending = self.db.query(sql);
        if let Some(since) = since {
            pending = pending.bind(("since", since.to_rfc3339()));
        }
        let mut res = pending.await?;
        let rows: Vec<DbLogEvent> = res.take(0)?;
        rows.into_iter().map(DbLogEvent::into_log_event).collect()
    }

    /// Ranked search over event messages
    #[instrument(skip(self, query), fields(text = ?query.text, limit = query.limit))]
    pub async fn search_events(&self, query: &EventQuery) -> Result<Vec<ScoredEvent>> {
        let (sql, binds) = query.to_surql();
        debug!(sql = %sql, "searching events");

        let mut pending = self.db.query(sql);
        for bind in binds {
            pending = pending.bind(bind);
        }
        let mut res = pending.await?;
        let rows: Vec<DbLogEvent> = res.take(0)?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_scored() {
                Ok(scored) => results.push(scored),
                Err(e) => warn!(error = %e, "skipping undecodable event"),
            }
        }
        Ok(results)
    }

    /// Newest `extra_data.response` logged by a script
    #[instrument(skip(self))]
    pub async fn latest_response(
        &self,
        script_name: &str,
        execution_id: Option<&str>,
    ) -> Result<Option<serde_json::Value>> {
        let scope = if execution_id.is_some() {
            " AND execution_id = $execution_id"
        } else {
            ""
        };
        let sql = format!(
            "SELECT extra_data.response AS response, timestamp FROM log_events WHERE script_name = $script_name AND extra_data.response != NONE{} ORDER BY timestamp DESC LIMIT 1",
            scope
        );
        let mut pending = self
            .db
            .query(sql)
            .bind(("script_name", script_name.to_string()));
        if let Some(id) = execution_id {
            pending = pending.bind(("execution_id", id.to_string()));
        }
        let mut res = pending.await?;
        let rows: Vec<ResponseRow> = res.take(0)?;
        Ok(rows.into_iter().next().and_then(|r| r.response))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CountRow {
    pub(crate) count: u64,
}

#[derive(Debug, Deserialize)]
struct LevelCountRow {
    level: String,
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ResponseRow {
    #[serde(default)]
    response: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LogLevel;

    #[test]
    fn test_empty_text_orders_by_recency() {
        let query = EventQuery {
            text: Some("   ".into()),
            limit: 5,
            ..Default::default()
        };
        let (sql, binds) = query.to_surql();
        assert_eq!(sql, "SELECT * FROM log_events ORDER BY timestamp DESC LIMIT 5");
        assert!(binds.is_empty());
    }

    #[test]
    fn test_text_and_filters_render_bm25_query() {
        let query = EventQuery {
            text: Some("connection refused".into()),
            level: Some(LogLevel::Error),
            tags: vec!["db".into()],
            limit: 10,
            ..Default::default()
        };
        let (sql, binds) = query.to_surql();
        assert!(sql.starts_with("SELECT *, search::score(1) AS score FROM log_events WHERE message @1@ $query"));
        assert!(sql.contains("level = $level"));
        assert!(sql.contains("tags CONTAINSALL $tags"));
        assert!(sql.ends_with("ORDER BY score DESC, timestamp DESC LIMIT 10"));
        let names: Vec<&str> = binds.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["query", "level", "tags"]);
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_per_event_id() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        let events = vec![
            LogEvent::new(LogLevel::Info, "first").with_execution("e1", "job"),
            LogEvent::new(LogLevel::Error, "second").with_execution("e1", "job"),
        ];

        handle.insert_events(&events).await.unwrap();
        handle.insert_events(&events).await.unwrap();

        assert_eq!(handle.count_events(Some("e1")).await.unwrap(), 2);
        let loaded = handle.get_event(&events[1].id).await.unwrap().unwrap();
        assert_eq!(loaded.message, "second");
        assert_eq!(loaded.level, LogLevel::Error);
    }

    #[tokio::test]
    async fn test_level_counts_and_recent_errors() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        let events = vec![
            LogEvent::new(LogLevel::Info, "start").with_execution("e2", "job"),
            LogEvent::new(LogLevel::Error, "bad thing").with_execution("e2", "job"),
            LogEvent::new(LogLevel::Critical, "worse thing").with_execution("e2", "job"),
            LogEvent::new(LogLevel::Error, "other run").with_execution("e3", "job"),
        ];
        handle.insert_events(&events).await.unwrap();

        let counts = handle.level_counts("e2").await.unwrap();
        assert_eq!(counts.get("INFO"), Some(&1));
        assert_eq!(counts.get("ERROR"), Some(&1));
        assert_eq!(counts.get("CRITICAL"), Some(&1));

        let errors = handle.recent_errors("e2", 10).await.unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.level.is_error()));
    }

    #[tokio::test]
    async fn test_errors_since_spans_executions() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        let mut stale = LogEvent::new(LogLevel::Error, "old failure").with_execution("e4", "job");
        stale.timestamp = Utc::now() - chrono::Duration::days(3);
        let events = vec![
            stale,
            LogEvent::new(LogLevel::Error, "fresh failure").with_execution("e4", "job"),
            LogEvent::new(LogLevel::Critical, "fresh crash").with_execution("e5", "other"),
            LogEvent::new(LogLevel::Warning, "not an error").with_execution("e5", "other"),
        ];
        handle.insert_events(&events).await.unwrap();

        assert_eq!(handle.errors_since(None).await.unwrap().len(), 3);
        let recent = handle
            .errors_since(Some(Utc::now() - chrono::Duration::days(1)))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|e| e.message.starts_with("fresh")));
    }
}
