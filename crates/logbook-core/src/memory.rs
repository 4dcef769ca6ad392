//! Agent memory: free-text learnings, searchable by keyword.

use std::collections::BTreeMap;

use logbook_store::{AgentLearning, SurrealHandle};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::relationships::preview;

/// Bonus added when the whole query occurs verbatim.
const PHRASE_BONUS: f64 = 0.5;

/// Entries listed in [`MemoryStats::most_accessed`].
const MOST_ACCESSED: usize = 5;

const PREVIEW_CHARS: usize = 100;

/// A learning with its match score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryHit {
    pub learning: AgentLearning,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessPreview {
    pub content: String,
    #[serde(rename = "type")]
    pub learning_type: String,
    pub access_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
    pub most_accessed: Vec<AccessPreview>,
}

/// Lowercased, de-duplicated keywords in query order.
fn keywords(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in text.to_lowercase().split_whitespace() {
        if !out.iter().any(|w| w == word) {
            out.push(word.to_string());
        }
    }
    out
}

/// Fraction of keywords contained, plus the phrase bonus.
fn score(content: &str, phrase: &str, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 1.0;
    }
    let content = content.to_lowercase();
    let hits = keywords.iter().filter(|k| content.contains(k.as_str())).count();
    let mut score = hits as f64 / keywords.len() as f64;
    if keywords.len() > 1 && content.contains(phrase) {
        score += PHRASE_BONUS;
    }
    score
}

#[derive(Debug, Clone)]
pub struct MemoryService {
    handle: SurrealHandle,
}

impl MemoryService {
    pub fn new(handle: SurrealHandle) -> Self {
        Self { handle }
    }

    #[instrument(skip(self, content, metadata))]
    pub async fn add(
        &self,
        content: &str,
        learning_type: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<AgentLearning> {
        let learning = AgentLearning::new(content, learning_type, metadata);
        self.handle.insert_learning(&learning).await?;
        Ok(learning)
    }

    /// Keyword search, best match first.
    ///
    /// Candidates are ranked by the database before the cut to `limit`, so
    /// an older full match is never displaced by newer partial ones.
    /// Returned learnings have their access count bumped; the records in
    /// the result reflect the bump.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        text: &str,
        learning_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryHit>> {
        let limit = limit.max(1);
        let words = keywords(text);
        let phrase = text.trim().to_lowercase();

        let candidates = self
            .handle
            .rank_learnings(&words, &phrase, learning_type, limit)
            .await?;

        let mut hits: Vec<MemoryHit> = candidates
            .into_iter()
            .map(|learning| MemoryHit {
                score: score(&learning.content, &phrase, &words),
                learning,
            })
            .collect();
        // stable sort keeps newest-first among equal scores
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);

        let keys: Vec<String> = hits.iter().map(|h| h.learning.id.clone()).collect();
        match self.handle.touch_learnings(&keys).await {
            Ok(()) => {
                let now = chrono::Utc::now();
                for hit in &mut hits {
                    hit.learning.access_count += 1;
                    hit.learning.last_accessed = Some(now);
                }
            }
            Err(err) => warn!(error = %err, "could not update memory access counts"),
        }
        debug!(hits = hits.len(), "memory search finished");
        Ok(hits)
    }

    /// Newest learnings first.
    pub async fn recent(&self, learning_type: Option<&str>, limit: usize) -> Result<Vec<AgentLearning>> {
        Ok(self.handle.find_learnings(&[], learning_type, limit).await?)
    }

    pub async fn stats(&self, learning_type: Option<&str>) -> Result<MemoryStats> {
        let counts = self.handle.learning_stats(learning_type).await?;
        let most_accessed = self
            .handle
            .most_accessed_learnings(learning_type, MOST_ACCESSED)
            .await?
            .into_iter()
            .map(|l| AccessPreview {
                content: preview(&l.content, PREVIEW_CHARS),
                learning_type: l.learning_type,
                access_count: l.access_count,
            })
            .collect();
        Ok(MemoryStats {
            total: counts.total,
            by_type: counts.by_type,
            most_accessed,
        })
    }

    /// Learnings recorded during an execution, oldest first.
    pub async fn for_execution(&self, execution_id: &str) -> Result<Vec<AgentLearning>> {
        Ok(self.handle.learnings_for_execution(execution_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_dedupe_and_lowercase() {
        assert_eq!(keywords("Retry retry  BACKOFF"), vec!["retry", "backoff"]);
        assert!(keywords("   ").is_empty());
    }

    #[test]
    fn test_score_fraction_and_phrase_bonus() {
        let words = keywords("retry backoff");
        assert_eq!(score("Use retry with backoff", "retry backoff", &words), 1.0);
        assert_eq!(score("Retry backoff works", "retry backoff", &words), 1.5);
        assert_eq!(score("retry only", "retry backoff", &words), 0.5);
        assert_eq!(score("anything", "", &[]), 1.0);
    }
}
