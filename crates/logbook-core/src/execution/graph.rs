//! Causality graph of one execution.

use chrono::{DateTime, Utc};
use logbook_store::{render_record_id, CausalityEdge, EdgeType, LogLevel};
use serde::Serialize;

/// Message characters shown in a node label.
pub const LABEL_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    /// `log_events:<key>`
    pub id: String,
    pub label: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub confidence: f64,
}

impl From<CausalityEdge> for GraphEdge {
    fn from(edge: CausalityEdge) -> Self {
        Self {
            id: edge.id,
            from: edge.from,
            to: edge.to,
            edge_type: edge.edge_type,
            confidence: edge.confidence,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphMetadata {
    pub execution_id: String,
    pub total_logs: usize,
    pub total_edges: usize,
    pub edge_errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub metadata: GraphMetadata,
}

impl ExecutionGraph {
    pub fn edges_of_type(&self, edge_type: EdgeType) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.edge_type == edge_type)
    }
}

pub(crate) fn node_for(event: &logbook_store::LogEvent) -> GraphNode {
    let short: String = event.message.chars().take(LABEL_CHARS).collect();
    GraphNode {
        id: render_record_id(&event.record_id()),
        label: format!("{}: {}...", event.level, short),
        timestamp: event.timestamp,
        level: event.level,
        function: event
            .function_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logbook_store::LogEvent;

    #[test]
    fn test_node_label_truncates_message() {
        let long = "x".repeat(80);
        let node = node_for(&LogEvent::new(LogLevel::Error, long));
        assert_eq!(node.label, format!("ERROR: {}...", "x".repeat(50)));
        assert_eq!(node.function, "unknown");
        assert!(node.id.starts_with("log_events:"));
    }

    #[test]
    fn test_node_label_short_message() {
        let node = node_for(&LogEvent::new(LogLevel::Info, "hi"));
        assert_eq!(node.label, "INFO: hi...");
    }
}
