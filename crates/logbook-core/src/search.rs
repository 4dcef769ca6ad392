//! Ranked search over ingested log messages.
//!
//! Text queries are scored with BM25 through the `log_text` analyzer; an
//! empty query falls back to the newest matching events with a uniform
//! score of 1.0. [`SearchService::error_patterns`] groups recurring errors
//! across executions and lists the fixes recorded for them.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use logbook_store::{
    parse_record_id, record_key, render_record_id, Direction, EdgeType, EventQuery, LogEvent,
    LogLevel, SurrealHandle, AGENT_LEARNINGS, LOG_EVENTS,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::{LogbookError, Result};

/// Sample messages kept per error pattern.
pub const PATTERN_SAMPLES: usize = 3;

/// Fix edges followed per sample event.
const RESOLUTIONS_PER_SAMPLE: usize = 10;

/// Filter keys understood by [`SearchFilters::from_map`].
pub const SUPPORTED_FILTERS: &[&str] = &[
    "level",
    "script_name",
    "execution_id",
    "tags",
    "start",
    "end",
];

/// Exact-match restrictions applied on top of the text query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub level: Option<LogLevel>,
    pub script_name: Option<String>,
    pub execution_id: Option<String>,
    /// Every listed tag must be present
    pub tags: Vec<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn script(mut self, script_name: impl Into<String>) -> Self {
        self.script_name = Some(script_name.into());
        self
    }

    pub fn execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Build filters from loosely typed key/value pairs.
    ///
    /// Unknown keys and unparseable values are skipped with a warning.
    /// `tags` accepts a string (comma separated) or an array of strings;
    /// `start`/`end` are RFC 3339 timestamps.
    pub fn from_map(map: &serde_json::Map<String, Value>) -> Self {
        let mut filters = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "level" => match value.as_str().map(str::parse::<LogLevel>) {
                    Some(Ok(level)) => filters.level = Some(level),
                    _ => warn!(key = %key, value = %value, "ignoring invalid search filter value"),
                },
                "script_name" => filters.script_name = string_value(key, value),
                "execution_id" => filters.execution_id = string_value(key, value),
                "tags" => filters.tags = tag_values(value),
                "start" => filters.start = time_value(key, value),
                "end" => filters.end = time_value(key, value),
                other => warn!(key = %other, supported = ?SUPPORTED_FILTERS, "ignoring unsupported search filter"),
            }
        }
        filters
    }

    fn to_query(&self, text: &str, limit: usize) -> EventQuery {
        let text = text.trim();
        EventQuery {
            text: (!text.is_empty()).then(|| text.to_string()),
            level: self.level,
            script_name: self.script_name.clone(),
            execution_id: self.execution_id.clone(),
            tags: self.tags.clone(),
            start: self.start,
            end: self.end,
            limit,
        }
    }
}

fn string_value(key: &str, value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        other => {
            warn!(key = %key, value = %other, "ignoring non-string search filter value");
            None
        }
    }
}

fn tag_values(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        other => {
            warn!(value = %other, "ignoring invalid tags filter");
            Vec::new()
        }
    }
}

fn time_value(key: &str, value: &Value) -> Option<DateTime<Utc>> {
    let parsed = value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));
    if parsed.is_none() {
        warn!(key = %key, value = %value, "ignoring invalid timestamp filter");
    }
    parsed
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Full record id, `log_events:<key>`
    pub id: String,
    pub score: f64,
    pub event: LogEvent,
}

/// Collapse every run of ASCII digits to `N`, so messages differing only in
/// ids, counts or ports group together.
pub fn normalize_error_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut in_digits = false;
    for c in message.chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                out.push('N');
            }
            in_digits = true;
        } else {
            out.push(c);
            in_digits = false;
        }
    }
    out
}

/// Parse `<n>h`, `<n>d`, `<n>w` or `<n>m` (30-day months).
pub fn parse_time_range(range: &str) -> Result<Duration> {
    let range = range.trim();
    let invalid = || LogbookError::InvalidArgument(format!("invalid time range {range:?}"));
    let unit = range.chars().last().ok_or_else(invalid)?;
    let value: i64 = range[..range.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;
    if value < 0 {
        return Err(invalid());
    }
    let window = match unit {
        'h' => Duration::try_hours(value),
        'd' => Duration::try_days(value),
        'w' => Duration::try_weeks(value),
        'm' => value.checked_mul(30).and_then(Duration::try_days),
        _ => None,
    };
    window.ok_or_else(invalid)
}

/// A fix recorded for an error through a `FIXED_BY` edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    /// Full record id of the fixing record
    pub target: String,
    /// Table of the fixing record
    pub kind: String,
    pub description: String,
    pub confidence: f64,
}

/// Errors sharing one normalised message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPattern {
    pub pattern: String,
    pub count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Newest first
    pub sample_messages: Vec<String>,
    pub resolutions: Vec<Resolution>,
}

#[derive(Default)]
struct PatternGroup {
    count: usize,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    samples: Vec<LogEvent>,
}

/// Group newest-first errors by normalised message, keeping groups seen at
/// least `min_occurrences` times. Most frequent first, then most recent.
fn group_errors(events: Vec<LogEvent>, min_occurrences: usize) -> Vec<(String, PatternGroup)> {
    let mut groups: BTreeMap<String, PatternGroup> = BTreeMap::new();
    for event in events {
        let group = groups
            .entry(normalize_error_message(&event.message))
            .or_default();
        group.count += 1;
        group.last_seen = group.last_seen.max(Some(event.timestamp));
        group.first_seen = Some(match group.first_seen {
            Some(seen) => seen.min(event.timestamp),
            None => event.timestamp,
        });
        if group.samples.len() < PATTERN_SAMPLES {
            group.samples.push(event);
        }
    }

    let mut kept: Vec<(String, PatternGroup)> = groups
        .into_iter()
        .filter(|(_, g)| g.count >= min_occurrences.max(1))
        .collect();
    kept.sort_by(|a, b| {
        b.1.count
            .cmp(&a.1.count)
            .then_with(|| b.1.last_seen.cmp(&a.1.last_seen))
    });
    kept
}

/// BM25 search over `log_events`.
#[derive(Debug, Clone)]
pub struct SearchService {
    handle: SurrealHandle,
}

impl SearchService {
    pub fn new(handle: SurrealHandle) -> Self {
        Self { handle }
    }

    /// Ranked by score, then newest first.
    #[instrument(skip(self, filters))]
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let results = self
            .handle
            .search_events(&filters.to_query(query, limit))
            .await?;
        debug!(hits = results.len(), "search finished");

        Ok(results
            .into_iter()
            .map(|scored| SearchHit {
                id: render_record_id(&scored.event.record_id()),
                score: scored.score,
                event: scored.event,
            })
            .collect())
    }

    /// Recurring ERROR/CRITICAL messages within `window` (all time when
    /// `None`), with the fixes recorded against their samples.
    #[instrument(skip(self))]
    pub async fn error_patterns(
        &self,
        window: Option<Duration>,
        min_occurrences: usize,
    ) -> Result<Vec<ErrorPattern>> {
        let since = window.map(|w| Utc::now() - w);
        let events = self.handle.errors_since(since).await?;
        let examined = events.len();

        let mut patterns = Vec::new();
        for (pattern, group) in group_errors(events, min_occurrences) {
            let resolutions = self.resolutions_for(&group.samples).await?;
            let (Some(first_seen), Some(last_seen)) = (group.first_seen, group.last_seen) else {
                continue;
            };
            patterns.push(ErrorPattern {
                pattern,
                count: group.count,
                first_seen,
                last_seen,
                sample_messages: group.samples.into_iter().map(|e| e.message).collect(),
                resolutions,
            });
        }
        debug!(examined, patterns = patterns.len(), "error pattern analysis finished");
        Ok(patterns)
    }

    async fn resolutions_for(&self, samples: &[LogEvent]) -> Result<Vec<Resolution>> {
        let mut resolutions: Vec<Resolution> = Vec::new();
        for event in samples {
            let edges = self
                .handle
                .edges_for(
                    &event.record_id(),
                    Direction::Outbound,
                    &[EdgeType::FixedBy],
                    0.0,
                    RESOLUTIONS_PER_SAMPLE,
                )
                .await?;
            for edge in edges {
                if resolutions.iter().any(|r| r.target == edge.to) {
                    continue;
                }
                let Some(thing) = parse_record_id(&edge.to) else {
                    warn!(edge = %edge.to, "skipping fix edge with unreadable target");
                    continue;
                };
                let described = match thing.tb.as_str() {
                    LOG_EVENTS => self
                        .handle
                        .get_event(&record_key(&thing))
                        .await?
                        .map(|e| e.message),
                    AGENT_LEARNINGS => self
                        .handle
                        .get_learning(&record_key(&thing))
                        .await?
                        .map(|l| l.content),
                    _ => None,
                };
                resolutions.push(Resolution {
                    kind: thing.tb.clone(),
                    description: described.unwrap_or_else(|| edge.target_text.clone()),
                    target: edge.to,
                    confidence: edge.confidence,
                });
            }
        }
        Ok(resolutions)
    }
}
