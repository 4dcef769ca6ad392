//! `log_causality` relation operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::handle::SurrealHandle;
use crate::schema::{record_key, render_record_id, surreal_datetime, CausalityEdge, EdgeType};
use crate::Result;

/// Edge payload before it is related
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeDraft {
    pub edge_type: EdgeType,
    pub confidence: f64,
    pub context: serde_json::Map<String, serde_json::Value>,
    pub source_text: String,
    pub target_text: String,
}

/// Which side of an edge a record sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Edges leaving the record
    Outbound,
    /// Edges pointing at the record
    Inbound,
    Any,
}

#[derive(Debug, Clone, Serialize)]
struct DbEdgeContent {
    edge_type: String,
    confidence: f64,
    #[serde(with = "surreal_datetime")]
    timestamp: DateTime<Utc>,
    context: serde_json::Map<String, serde_json::Value>,
    source_text: String,
    target_text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DbEdge {
    id: Thing,
    #[serde(rename = "in")]
    from: Thing,
    #[serde(rename = "out")]
    to: Thing,
    edge_type: String,
    confidence: f64,
    #[serde(with = "surreal_datetime")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    context: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    source_text: String,
    #[serde(default)]
    target_text: String,
}

impl DbEdge {
    fn into_edge(self) -> Result<CausalityEdge> {
        let edge_type = self
            .edge_type
            .parse::<EdgeType>()
            .map_err(StoreError::Serialization)?;
        Ok(CausalityEdge {
            id: record_key(&self.id),
            from: render_record_id(&self.from),
            to: render_record_id(&self.to),
            edge_type,
            confidence: self.confidence,
            timestamp: self.timestamp,
            context: self.context,
            source_text: self.source_text,
            target_text: self.target_text,
        })
    }
}

impl SurrealHandle {
    // ========== Causality Edge Operations ==========

    /// Relate `from -> log_causality -> to`
    #[instrument(skip(self, draft), fields(edge_type = %draft.edge_type))]
    pub async fn insert_edge(
        &self,
        from: &Thing,
        to: &Thing,
        draft: &EdgeDraft,
    ) -> Result<CausalityEdge> {
        let content = DbEdgeContent {
            edge_type: draft.edge_type.as_str().to_string(),
            confidence: draft.confidence,
            timestamp: Utc::now(),
            context: draft.context.clone(),
            source_text: draft.source_text.clone(),
            target_text: draft.target_text.clone(),
        };

        let mut res = self
            .db
            .query("RELATE $from->log_causality->$to CONTENT $edge")
            .bind(("from", from.clone()))
            .bind(("to", to.clone()))
            .bind(("edge", content))
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        let rows: Vec<DbEdge> = res
            .take(0)
            .map_err(|e| StoreError::Transaction(e.to_string()))?;

        let edge = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Transaction("RELATE returned no edge".to_string()))?
            .into_edge()?;
        debug!(from = %edge.from, to = %edge.to, "edge related");
        Ok(edge)
    }

    /// Edges touching a record, strongest and newest first
    #[instrument(skip(self))]
    pub async fn edges_for(
        &self,
        record: &Thing,
        direction: Direction,
        types: &[EdgeType],
        min_confidence: f64,
        limit: usize,
    ) -> Result<Vec<CausalityEdge>> {
        let side = match direction {
            Direction::Outbound => "in = $record",
            Direction::Inbound => "out = $record",
            Direction::Any => "(in = $record OR out = $record)",
        };
        let type_filter = if types.is_empty() {
            ""
        } else {
            " AND edge_type IN $types"
        };
        let sql = format!(
            "SELECT * FROM log_causality WHERE {}{} AND confidence >= $min_confidence ORDER BY confidence DESC, timestamp DESC LIMIT {}",
            side,
            type_filter,
            limit.max(1)
        );
        let type_names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();

        let mut res = self
            .db
            .query(sql)
            .bind(("record", record.clone()))
            .bind(("types", type_names))
            .bind(("min_confidence", min_confidence))
            .await?;
        let rows: Vec<DbEdge> = res.take(0)?;
        rows.into_iter().map(DbEdge::into_edge).collect()
    }

    /// Edges created while analysing an execution
    #[instrument(skip(self))]
    pub async fn edges_for_execution(&self, execution_id: &str) -> Result<Vec<CausalityEdge>> {
        let mut res = self
            .db
            .query("SELECT * FROM log_causality WHERE context.execution_id = $execution_id ORDER BY timestamp ASC")
            .bind(("execution_id", execution_id.to_string()))
            .await?;
        let rows: Vec<DbEdge> = res.take(0)?;
        rows.into_iter().map(DbEdge::into_edge).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LogEvent, LogLevel};

    fn draft(edge_type: EdgeType, confidence: f64) -> EdgeDraft {
        let mut context = serde_json::Map::new();
        context.insert("execution_id".into(), serde_json::json!("e1"));
        EdgeDraft {
            edge_type,
            confidence,
            context,
            source_text: "a".into(),
            target_text: "b".into(),
        }
    }

    #[tokio::test]
    async fn test_relate_and_traverse() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        let a = LogEvent::new(LogLevel::Error, "Upload failed").with_execution("e1", "job");
        let b = LogEvent::new(LogLevel::Info, "Retrying upload").with_execution("e1", "job");
        handle.insert_events(&[a.clone(), b.clone()]).await.unwrap();

        let edge = handle
            .insert_edge(&a.record_id(), &b.record_id(), &draft(EdgeType::RetryOf, 0.85))
            .await
            .unwrap();
        assert_eq!(edge.from, format!("log_events:{}", a.id));
        assert_eq!(edge.to, format!("log_events:{}", b.id));
        handle
            .insert_edge(&a.record_id(), &b.record_id(), &draft(EdgeType::FollowedBy, 1.0))
            .await
            .unwrap();

        let outbound = handle
            .edges_for(&a.record_id(), Direction::Outbound, &[], 0.5, 10)
            .await
            .unwrap();
        assert_eq!(outbound.len(), 2);
        assert_eq!(outbound[0].edge_type, EdgeType::FollowedBy);

        let inbound_retries = handle
            .edges_for(&b.record_id(), Direction::Inbound, &[EdgeType::RetryOf], 0.5, 10)
            .await
            .unwrap();
        assert_eq!(inbound_retries.len(), 1);

        let none_above = handle
            .edges_for(&a.record_id(), Direction::Any, &[], 0.9, 10)
            .await
            .unwrap();
        assert_eq!(none_above.len(), 1);

        assert_eq!(handle.edges_for_execution("e1").await.unwrap().len(), 2);
    }
}
