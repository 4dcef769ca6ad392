//! Causality edges between log events.
//!
//! Rules are plain substring checks over the lowercased messages, applied
//! in table order. Every rule that matches yields its own edge.

use logbook_store::{
    parse_record_id, record_id, record_key, CausalityEdge, Direction, EdgeDraft, EdgeType,
    LogEvent, SurrealHandle, Thing, AGENT_LEARNINGS, LOG_EVENTS,
};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::error::{LogbookError, Result};

/// Characters of each message kept on an edge.
pub const EDGE_PREVIEW_CHARS: usize = 200;

/// One extraction rule.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipRule {
    pub edge_type: EdgeType,
    pub confidence: f64,
    /// Edge points from the second event to the first
    pub reversed: bool,
    /// Called with both messages already lowercased
    pub matches: fn(&str, &str) -> bool,
}

fn retry_after_failure(a: &str, b: &str) -> bool {
    a.contains("failed") && b.contains("retry")
}

fn fix_after_error(a: &str, b: &str) -> bool {
    a.contains("error") && (b.contains("fix") || b.contains("resolved"))
}

fn explained_cause(_a: &str, b: &str) -> bool {
    b.contains("caused") || b.contains("because")
}

fn always(_a: &str, _b: &str) -> bool {
    true
}

/// Extraction rules in evaluation order.
pub const RULES: &[RelationshipRule] = &[
    RelationshipRule {
        edge_type: EdgeType::RetryOf,
        confidence: 0.85,
        reversed: false,
        matches: retry_after_failure,
    },
    RelationshipRule {
        edge_type: EdgeType::FixedBy,
        confidence: 0.90,
        reversed: false,
        matches: fix_after_error,
    },
    RelationshipRule {
        edge_type: EdgeType::CausedBy,
        confidence: 0.75,
        reversed: true,
        matches: explained_cause,
    },
    RelationshipRule {
        edge_type: EdgeType::FollowedBy,
        confidence: 1.0,
        reversed: false,
        matches: always,
    },
];

/// A rule hit, before it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Relationship {
    pub edge_type: EdgeType,
    pub confidence: f64,
    pub reversed: bool,
}

/// Evaluate [`RULES`] against two messages, `text_a` logged first.
pub fn extract_relationships(text_a: &str, text_b: &str) -> Vec<Relationship> {
    let a = text_a.to_lowercase();
    let b = text_b.to_lowercase();
    RULES
        .iter()
        .filter(|rule| (rule.matches)(&a, &b))
        .map(|rule| Relationship {
            edge_type: rule.edge_type,
            confidence: rule.confidence,
            reversed: rule.reversed,
        })
        .collect()
}

/// First `max` characters of `text`, with an ellipsis when cut.
pub(crate) fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Edges persisted for one pair, plus any per-edge failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionOutcome {
    pub edges: Vec<CausalityEdge>,
    pub errors: Vec<String>,
}

/// An edge seen from one of its endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedEvent {
    pub edge: CausalityEdge,
    /// Record id on the other side, `table:key`
    pub neighbour: String,
    /// Neighbouring log event, when the neighbour is one
    pub event: Option<LogEvent>,
}

/// Accept either a bare key or a full `table:key` id.
fn resolve_id(table: &str, id: &str) -> Thing {
    match parse_record_id(id) {
        Some(thing) if thing.tb == table => thing,
        _ => record_id(table, id),
    }
}

#[derive(Debug, Clone)]
pub struct RelationshipExtractor {
    handle: SurrealHandle,
}

impl RelationshipExtractor {
    pub fn new(handle: SurrealHandle) -> Self {
        Self { handle }
    }

    /// Persist every relationship between `first` and `second`.
    ///
    /// The pair's execution id is added to `context` when missing. A failed
    /// insert is recorded in the outcome and the remaining rules still run.
    #[instrument(skip_all, fields(first = %first.id, second = %second.id))]
    pub async fn extract(
        &self,
        first: &LogEvent,
        second: &LogEvent,
        context: &serde_json::Map<String, serde_json::Value>,
    ) -> ExtractionOutcome {
        let mut context = context.clone();
        context
            .entry("execution_id")
            .or_insert_with(|| first.execution_id.clone().into());

        let mut outcome = ExtractionOutcome::default();
        for rel in extract_relationships(&first.message, &second.message) {
            let (from, to) = if rel.reversed {
                (second, first)
            } else {
                (first, second)
            };
            let draft = EdgeDraft {
                edge_type: rel.edge_type,
                confidence: rel.confidence,
                context: context.clone(),
                source_text: preview(&from.message, EDGE_PREVIEW_CHARS),
                target_text: preview(&to.message, EDGE_PREVIEW_CHARS),
            };
            match self
                .handle
                .insert_edge(&from.record_id(), &to.record_id(), &draft)
                .await
            {
                Ok(edge) => outcome.edges.push(edge),
                Err(err) => {
                    warn!(edge_type = %rel.edge_type, error = %err, "could not store relationship");
                    outcome.errors.push(format!("{}: {}", rel.edge_type, err));
                }
            }
        }
        debug!(
            edges = outcome.edges.len(),
            errors = outcome.errors.len(),
            "relationships extracted"
        );
        outcome
    }

    /// Neighbours of an event through stored edges, strongest then newest.
    #[instrument(skip(self))]
    pub async fn find_related(
        &self,
        event_id: &str,
        direction: Direction,
        types: &[EdgeType],
        min_confidence: f64,
        limit: usize,
    ) -> Result<Vec<RelatedEvent>> {
        let record = resolve_id(LOG_EVENTS, event_id);
        let own = logbook_store::render_record_id(&record);
        let edges = self
            .handle
            .edges_for(&record, direction, types, min_confidence, limit)
            .await?;

        let mut related = Vec::with_capacity(edges.len());
        for edge in edges {
            let neighbour = if edge.from == own {
                edge.to.clone()
            } else {
                edge.from.clone()
            };
            let event = match parse_record_id(&neighbour) {
                Some(thing) if thing.tb == LOG_EVENTS => {
                    self.handle.get_event(&record_key(&thing)).await?
                }
                _ => None,
            };
            related.push(RelatedEvent {
                edge,
                neighbour,
                event,
            });
        }
        Ok(related)
    }

    /// Relate a log event to an agent learning.
    #[instrument(skip(self, context))]
    pub async fn link_learning(
        &self,
        event_id: &str,
        learning_id: &str,
        edge_type: EdgeType,
        confidence: f64,
        context: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CausalityEdge> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(LogbookError::InvalidArgument(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }
        let event_key = record_key(&resolve_id(LOG_EVENTS, event_id));
        let event = self.handle.get_event(&event_key).await?;
        let learning = resolve_id(AGENT_LEARNINGS, learning_id);

        let draft = EdgeDraft {
            edge_type,
            confidence,
            context,
            source_text: event
                .map(|e| preview(&e.message, EDGE_PREVIEW_CHARS))
                .unwrap_or_default(),
            target_text: String::new(),
        };
        Ok(self
            .handle
            .insert_edge(&record_id(LOG_EVENTS, &event_key), &learning, &draft)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(rels: &[Relationship]) -> Vec<EdgeType> {
        rels.iter().map(|r| r.edge_type).collect()
    }

    #[test]
    fn test_retry_after_failure() {
        let rels = extract_relationships("Database connection failed", "Retrying database connection");
        assert_eq!(types(&rels), vec![EdgeType::RetryOf, EdgeType::FollowedBy]);
        assert_eq!(rels[0].confidence, 0.85);
    }

    #[test]
    fn test_fix_and_cause_rules() {
        let rels = extract_relationships("ERROR: index corrupt", "Resolved because rebuild ran");
        assert_eq!(
            types(&rels),
            vec![EdgeType::FixedBy, EdgeType::CausedBy, EdgeType::FollowedBy]
        );
        assert!(rels[1].reversed);
        assert_eq!(rels[1].confidence, 0.75);
    }

    #[test]
    fn test_followed_by_always_present() {
        let rels = extract_relationships("step one", "step two");
        assert_eq!(types(&rels), vec![EdgeType::FollowedBy]);
        assert_eq!(rels[0].confidence, 1.0);
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééé", 3), "ééé...");
    }

    #[test]
    fn test_resolve_id_accepts_both_forms() {
        assert_eq!(record_key(&resolve_id(LOG_EVENTS, "abc")), "abc");
        assert_eq!(record_key(&resolve_id(LOG_EVENTS, "log_events:abc")), "abc");
    }

    #[tokio::test]
    async fn test_link_learning_rejects_out_of_range_confidence() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        let extractor = RelationshipExtractor::new(handle);
        let result = extractor
            .link_learning(
                "log_events:abc",
                "agent_learnings:xyz",
                EdgeType::FixedBy,
                1.5,
                serde_json::Map::new(),
            )
            .await;
        assert!(matches!(result, Err(LogbookError::InvalidArgument(_))));
    }
}
