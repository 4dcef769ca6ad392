//! Retention pruning across all log tables

use chrono::{DateTime, Utc};
use serde::Serialize;
use surrealdb::sql::Datetime as SurrealDatetime;
use tracing::{info, instrument};

use crate::error::StoreError;
use crate::events::CountRow;
use crate::handle::SurrealHandle;
use crate::schema::{AGENT_LEARNINGS, LOG_CAUSALITY, LOG_EVENTS, SCRIPT_RUNS};
use crate::Result;

/// Selection of records to prune. Criteria combine with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionFilter {
    /// Only records stamped strictly before this instant
    pub before: Option<DateTime<Utc>>,
    /// Only records belonging to one of these executions
    pub execution_ids: Option<Vec<String>>,
}

impl RetentionFilter {
    pub fn is_empty(&self) -> bool {
        self.before.is_none() && self.execution_ids.is_none()
    }
}

/// Examined/deleted counts for one table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub examined: u64,
    pub deleted: u64,
}

/// Per-table pruning outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneCounts {
    pub log_events: TableCounts,
    pub script_runs: TableCounts,
    pub agent_learnings: TableCounts,
    pub log_causality: TableCounts,
}

impl PruneCounts {
    pub fn total_examined(&self) -> u64 {
        self.log_events.examined
            + self.script_runs.examined
            + self.agent_learnings.examined
            + self.log_causality.examined
    }

    pub fn total_deleted(&self) -> u64 {
        self.log_events.deleted
            + self.script_runs.deleted
            + self.agent_learnings.deleted
            + self.log_causality.deleted
    }
}

/// (table, timestamp field, execution id field)
const PRUNE_TARGETS: [(&str, &str, &str); 4] = [
    // edges first: deleting an event also drops the edges attached to it
    (LOG_CAUSALITY, "timestamp", "context.execution_id"),
    (AGENT_LEARNINGS, "timestamp", "metadata.execution_id"),
    (LOG_EVENTS, "timestamp", "execution_id"),
    (SCRIPT_RUNS, "start_time", "execution_id"),
];

fn where_clause(filter: &RetentionFilter, time_field: &str, execution_field: &str) -> String {
    let mut clauses = Vec::new();
    if filter.before.is_some() {
        clauses.push(format!("{} < $before", time_field));
    }
    if filter.execution_ids.is_some() {
        clauses.push(format!("{} IN $execution_ids", execution_field));
    }
    clauses.join(" AND ")
}

impl SurrealHandle {
    // ========== Retention Operations ==========

    async fn count_matching(&self, table: &str, condition: &str, filter: &RetentionFilter) -> Result<u64> {
        let sql = format!(
            "SELECT count() AS count FROM {} WHERE {} GROUP ALL",
            table, condition
        );
        let mut res = self
            .db
            .query(sql)
            .bind(("before", filter.before.map(SurrealDatetime::from)))
            .bind(("execution_ids", filter.execution_ids.clone().unwrap_or_default()))
            .await?;
        let rows: Vec<CountRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }

    /// Count (and unless `dry_run`, delete) records matching `filter`.
    ///
    /// An empty filter is a no-op and reports zero everywhere.
    #[instrument(skip(self))]
    pub async fn prune(&self, filter: &RetentionFilter, dry_run: bool) -> Result<PruneCounts> {
        let mut counts = PruneCounts::default();
        if filter.is_empty() {
            return Ok(counts);
        }

        for (table, time_field, execution_field) in PRUNE_TARGETS {
            let condition = where_clause(filter, time_field, execution_field);
            let examined = self.count_matching(table, &condition, filter).await?;

            let deleted = if dry_run || examined == 0 {
                0
            } else {
                self.db
                    .query(format!("DELETE {} WHERE {}", table, condition))
                    .bind(("before", filter.before.map(SurrealDatetime::from)))
                    .bind(("execution_ids", filter.execution_ids.clone().unwrap_or_default()))
                    .await
                    .and_then(|res| res.check())
                    .map_err(|e| StoreError::Transaction(format!("prune {}: {}", table, e)))?;
                let remaining = self.count_matching(table, &condition, filter).await?;
                examined.saturating_sub(remaining)
            };

            let slot = match table {
                LOG_CAUSALITY => &mut counts.log_causality,
                AGENT_LEARNINGS => &mut counts.agent_learnings,
                LOG_EVENTS => &mut counts.log_events,
                _ => &mut counts.script_runs,
            };
            *slot = TableCounts { examined, deleted };
        }

        info!(
            dry_run,
            examined = counts.total_examined(),
            deleted = counts.total_deleted(),
            "prune complete"
        );
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LogEvent, LogLevel, ScriptRun};

    #[test]
    fn test_where_clause_combines_with_and() {
        let filter = RetentionFilter {
            before: Some(Utc::now()),
            execution_ids: Some(vec!["a".into()]),
        };
        assert_eq!(
            where_clause(&filter, "start_time", "execution_id"),
            "start_time < $before AND execution_id IN $execution_ids"
        );
    }

    #[tokio::test]
    async fn test_empty_filter_is_noop() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        handle
            .insert_events(&[LogEvent::new(LogLevel::Info, "keep me")])
            .await
            .unwrap();
        let counts = handle.prune(&RetentionFilter::default(), false).await.unwrap();
        assert_eq!(counts, PruneCounts::default());
        assert_eq!(handle.count_events(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_by_execution() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        handle
            .insert_events(&[
                LogEvent::new(LogLevel::Info, "one").with_execution("old", "job"),
                LogEvent::new(LogLevel::Info, "two").with_execution("old", "job"),
                LogEvent::new(LogLevel::Info, "three").with_execution("new", "job"),
            ])
            .await
            .unwrap();
        handle
            .create_run(&ScriptRun::start("old", "job", serde_json::Map::new()))
            .await
            .unwrap();

        let filter = RetentionFilter {
            before: None,
            execution_ids: Some(vec!["old".into()]),
        };
        let dry = handle.prune(&filter, true).await.unwrap();
        assert_eq!(dry.log_events, TableCounts { examined: 2, deleted: 0 });
        assert_eq!(dry.script_runs.examined, 1);
        assert_eq!(handle.count_events(None).await.unwrap(), 3);

        let real = handle.prune(&filter, false).await.unwrap();
        assert_eq!(real.log_events, TableCounts { examined: 2, deleted: 2 });
        assert_eq!(real.script_runs.deleted, 1);
        assert_eq!(handle.count_events(None).await.unwrap(), 1);
        assert!(handle.get_run("old").await.unwrap().is_none());
    }
}
