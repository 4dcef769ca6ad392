//! Retention criteria for pruning.

use chrono::{DateTime, Duration, Utc};
use logbook_store::{PruneCounts, RetentionFilter};
use serde::Serialize;

/// Which records to prune. Set criteria combine with AND; a zero day count
/// or an empty id list counts as unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneCriteria {
    pub older_than_days: Option<u32>,
    pub execution_ids: Option<Vec<String>>,
}

impl PruneCriteria {
    pub fn older_than_days(days: u32) -> Self {
        Self {
            older_than_days: Some(days),
            execution_ids: None,
        }
    }

    pub fn executions<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            older_than_days: None,
            execution_ids: Some(ids.into_iter().map(Into::into).collect()),
        }
    }

    pub fn and_older_than_days(mut self, days: u32) -> Self {
        self.older_than_days = Some(days);
        self
    }

    pub(crate) fn to_filter(&self, now: DateTime<Utc>) -> RetentionFilter {
        RetentionFilter {
            before: self
                .older_than_days
                .filter(|d| *d > 0)
                .map(|d| now - Duration::days(i64::from(d))),
            execution_ids: self.execution_ids.clone().filter(|ids| !ids.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub dry_run: bool,
    /// False when no usable criterion was given and nothing was examined
    pub applied: bool,
    pub counts: PruneCounts,
}
