//! `agent_learnings` operations

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::handle::SurrealHandle;
use crate::schema::{
    record_id, record_key, surreal_datetime, surreal_datetime_opt, AgentLearning, AGENT_LEARNINGS,
};
use crate::Result;

/// Wire row for `agent_learnings`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbLearning {
    #[serde(default, skip_serializing)]
    id: Option<Thing>,
    content: String,
    #[serde(rename = "type")]
    learning_type: String,
    #[serde(with = "surreal_datetime")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    access_count: u64,
    #[serde(default, with = "surreal_datetime_opt")]
    last_accessed: Option<DateTime<Utc>>,
}

impl From<&AgentLearning> for DbLearning {
    fn from(learning: &AgentLearning) -> Self {
        DbLearning {
            id: None,
            content: learning.content.clone(),
            learning_type: learning.learning_type.clone(),
            timestamp: learning.timestamp,
            metadata: learning.metadata.clone(),
            access_count: learning.access_count,
            last_accessed: learning.last_accessed,
        }
    }
}

impl DbLearning {
    fn into_learning(self) -> Result<AgentLearning> {
        let id = self
            .id
            .as_ref()
            .map(record_key)
            .ok_or_else(|| StoreError::Serialization("learning row without id".into()))?;
        Ok(AgentLearning {
            id,
            content: self.content,
            learning_type: self.learning_type,
            timestamp: self.timestamp,
            metadata: self.metadata,
            access_count: self.access_count,
            last_accessed: self.last_accessed,
        })
    }
}

/// Aggregate view of stored learnings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearningStats {
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
}

fn contains_clause(param: &str) -> String {
    format!("string::contains(string::lowercase(content), {})", param)
}

/// `WHERE` clause for a type and an any-of keyword match, or empty.
fn learning_filter(keywords: &[String], learning_type: Option<&str>) -> String {
    let mut clauses = Vec::new();
    if learning_type.is_some() {
        clauses.push("`type` = $learning_type".to_string());
    }
    if !keywords.is_empty() {
        let any: Vec<String> = (0..keywords.len())
            .map(|i| contains_clause(&format!("$kw{}", i)))
            .collect();
        clauses.push(format!("({})", any.join(" OR ")));
    }
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

impl SurrealHandle {
    // ========== Agent Learning Operations ==========

    /// Persist a learning under its own record key
    #[instrument(skip(self, learning), fields(learning_type = %learning.learning_type))]
    pub async fn insert_learning(&self, learning: &AgentLearning) -> Result<()> {
        self.db
            .query("CREATE $id CONTENT $learning")
            .bind(("id", record_id(AGENT_LEARNINGS, &learning.id)))
            .bind(("learning", DbLearning::from(learning)))
            .await
            .and_then(|res| res.check())
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        debug!(id = %learning.id, "learning stored");
        Ok(())
    }

    /// Fetch a learning by record key
    #[instrument(skip(self))]
    pub async fn get_learning(&self, key: &str) -> Result<Option<AgentLearning>> {
        let mut res = self
            .db
            .query("SELECT * FROM $id")
            .bind(("id", record_id(AGENT_LEARNINGS, key)))
            .await?;
        let rows: Vec<DbLearning> = res.take(0)?;
        rows.into_iter()
            .next()
            .map(DbLearning::into_learning)
            .transpose()
    }

    /// Learnings containing any of `keywords` (case-insensitive), newest first.
    ///
    /// With no keywords every learning of the type qualifies.
    #[instrument(skip(self, keywords))]
    pub async fn find_learnings(
        &self,
        keywords: &[String],
        learning_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AgentLearning>> {
        let sql = format!(
            "SELECT * FROM agent_learnings{} ORDER BY timestamp DESC LIMIT {}",
            learning_filter(keywords, learning_type),
            limit.max(1)
        );
        self.query_learnings(sql, keywords, None, learning_type).await
    }

    /// Learnings containing any of `keywords`, best match first.
    ///
    /// Rows containing `phrase` verbatim come first, then rows matching
    /// more keywords, then the newest. The cut to `limit` happens after
    /// this ordering.
    #[instrument(skip(self, keywords, phrase))]
    pub async fn rank_learnings(
        &self,
        keywords: &[String],
        phrase: &str,
        learning_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AgentLearning>> {
        if keywords.is_empty() {
            return self.find_learnings(keywords, learning_type, limit).await;
        }
        let matched: Vec<String> = (0..keywords.len())
            .map(|i| format!("(IF {} THEN 1 ELSE 0 END)", contains_clause(&format!("$kw{}", i))))
            .collect();
        let sql = format!(
            "SELECT *, (IF {} THEN 1 ELSE 0 END) AS phrase_match, ({}) AS matched \
             FROM agent_learnings{} ORDER BY phrase_match DESC, matched DESC, timestamp DESC LIMIT {}",
            contains_clause("$phrase"),
            matched.join(" + "),
            learning_filter(keywords, learning_type),
            limit.max(1)
        );
        self.query_learnings(sql, keywords, Some(phrase), learning_type)
            .await
    }

    async fn query_learnings(
        &self,
        sql: String,
        keywords: &[String],
        phrase: Option<&str>,
        learning_type: Option<&str>,
    ) -> Result<Vec<AgentLearning>> {
        let mut pending = self.db.query(sql);
        if let Some(t) = learning_type {
            pending = pending.bind(("learning_type", t.to_string()));
        }
        if let Some(p) = phrase {
            pending = pending.bind(("phrase", p.to_lowercase()));
        }
        for (i, kw) in keywords.iter().enumerate() {
            pending = pending.bind((format!("kw{}", i), kw.to_lowercase()));
        }
        let mut res = pending.await?;
        let rows: Vec<DbLearning> = res.take(0)?;
        rows.into_iter().map(DbLearning::into_learning).collect()
    }

    /// Learnings scoped to an execution, oldest first
    #[instrument(skip(self))]
    pub async fn learnings_for_execution(&self, execution_id: &str) -> Result<Vec<AgentLearning>> {
        let mut res = self
            .db
            .query("SELECT * FROM agent_learnings WHERE metadata.execution_id = $execution_id ORDER BY timestamp ASC")
            .bind(("execution_id", execution_id.to_string()))
            .await?;
        let rows: Vec<DbLearning> = res.take(0)?;
        rows.into_iter().map(DbLearning::into_learning).collect()
    }

    /// Bump access bookkeeping for learnings returned by a search
    #[instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn touch_learnings(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let ids: Vec<Thing> = keys
            .iter()
            .map(|k| record_id(AGENT_LEARNINGS, k))
            .collect();
        self.db
            .query("UPDATE $ids SET access_count += 1, last_accessed = time::now()")
            .bind(("ids", ids))
            .await
            .and_then(|res| res.check())
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(())
    }

    /// Most frequently recalled learnings
    #[instrument(skip(self))]
    pub async fn most_accessed_learnings(
        &self,
        learning_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AgentLearning>> {
        let scope = if learning_type.is_some() {
            " WHERE `type` = $learning_type"
        } else {
            ""
        };
        let sql = format!(
            "SELECT * FROM agent_learnings{} ORDER BY access_count DESC LIMIT {}",
            scope,
            limit.max(1)
        );
        let mut pending = self.db.query(sql);
        if let Some(t) = learning_type {
            pending = pending.bind(("learning_type", t.to_string()));
        }
        let mut res = pending.await?;
        let rows: Vec<DbLearning> = res.take(0)?;
        rows.into_iter().map(DbLearning::into_learning).collect()
    }

    /// Totals per learning type
    #[instrument(skip(self))]
    pub async fn learning_stats(&self, learning_type: Option<&str>) -> Result<LearningStats> {
        let scope = if learning_type.is_some() {
            " WHERE `type` = $learning_type"
        } else {
            ""
        };
        let sql = format!(
            "SELECT `type`, count() AS count FROM agent_learnings{} GROUP BY `type`",
            scope
        );
        let mut pending = self.db.query(sql);
        if let Some(t) = learning_type {
            pending = pending.bind(("learning_type", t.to_string()));
        }
        let mut res = pending.await?;
        let rows: Vec<TypeCountRow> = res.take(0)?;

        let by_type: BTreeMap<String, u64> = rows
            .into_iter()
            .map(|r| (r.learning_type, r.count))
            .collect();
        Ok(LearningStats {
            total: by_type.values().sum(),
            by_type,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TypeCountRow {
    #[serde(rename = "type")]
    learning_type: String,
    count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped(execution_id: &str) -> serde_json::Map<String, serde_json::Value> {
        let mut metadata = serde_json::Map::new();
        metadata.insert("execution_id".into(), serde_json::json!(execution_id));
        metadata
    }

    #[tokio::test]
    async fn test_keyword_lookup_is_case_insensitive() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        handle
            .insert_learning(&AgentLearning::new("Retry with Backoff fixes flaky DB", "insight", serde_json::Map::new()))
            .await
            .unwrap();
        handle
            .insert_learning(&AgentLearning::new("Cache warmup is slow", "perf", serde_json::Map::new()))
            .await
            .unwrap();

        let hits = handle
            .find_learnings(&["backoff".into()], None, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("Backoff"));

        let typed = handle
            .find_learnings(&[], Some("perf"), 10)
            .await
            .unwrap();
        assert_eq!(typed.len(), 1);
        assert_eq!(typed[0].learning_type, "perf");
    }

    #[tokio::test]
    async fn test_ranking_prefers_full_matches_over_recency() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        handle
            .insert_learning(&AgentLearning::new("Connection pool exhaustion fixed by lowering limits", "insight", serde_json::Map::new()))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        for i in 0..4 {
            handle
                .insert_learning(&AgentLearning::new(format!("Connection reset {i}"), "insight", serde_json::Map::new()))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let keywords = vec!["pool".to_string(), "exhaustion".to_string()];
        let ranked = handle
            .rank_learnings(&keywords, "pool exhaustion", None, 1)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].content.starts_with("Connection pool exhaustion"));

        let keywords = vec!["connection".to_string(), "pool".to_string()];
        let ranked = handle
            .rank_learnings(&keywords, "connection pool", None, 2)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].content.starts_with("Connection pool exhaustion"));
        assert_eq!(ranked[1].content, "Connection reset 3");
    }

    #[tokio::test]
    async fn test_touch_and_stats() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        let first = AgentLearning::new("alpha", "insight", scoped("run-a"));
        let second = AgentLearning::new("beta", "insight", scoped("run-b"));
        let third = AgentLearning::new("gamma", "error", serde_json::Map::new());
        for l in [&first, &second, &third] {
            handle.insert_learning(l).await.unwrap();
        }

        handle.touch_learnings(&[second.id.clone()]).await.unwrap();
        let top = handle.most_accessed_learnings(None, 1).await.unwrap();
        assert_eq!(top[0].id, second.id);
        assert_eq!(top[0].access_count, 1);
        assert!(top[0].last_accessed.is_some());

        let stats = handle.learning_stats(None).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type.get("insight"), Some(&2));

        let scoped = handle.learnings_for_execution("run-a").await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].content, "alpha");
    }
}
