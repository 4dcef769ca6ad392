//! Per-sink atomic counters and their snapshot.
//!
//! Counters are bumped at the call site with relaxed ordering; readers take
//! a [`SinkStats`] snapshot, which is what the monitor and `stop()` report.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Connection state of a sink towards its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            2 => ConnectionState::Connected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkStats {
    pub total_logs: u64,
    pub successful_writes: u64,
    pub failed_writes: u64,
    pub buffered_logs: u64,
    pub dropped_logs: u64,
    pub replayed_logs: u64,
    pub quarantined_files: u64,
    pub last_error: Option<String>,
    pub connection_state: ConnectionState,
    pub alert_active: bool,
    pub queue_depth: usize,
}

impl SinkStats {
    /// Failed attempts as a percentage of all write outcomes.
    pub fn failure_rate(&self) -> f64 {
        let total = self.successful_writes + self.failed_writes;
        if total == 0 {
            0.0
        } else {
            self.failed_writes as f64 / total as f64 * 100.0
        }
    }
}

/// Lightweight atomic counters, one set per sink.
#[derive(Debug)]
pub(crate) struct SinkCounters {
    total_logs: AtomicU64,
    successful_writes: AtomicU64,
    failed_writes: AtomicU64,
    buffered_logs: AtomicU64,
    dropped_logs: AtomicU64,
    replayed_logs: AtomicU64,
    quarantined_files: AtomicU64,
    state: AtomicU8,
    alert_active: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl Default for SinkCounters {
    fn default() -> Self {
        Self {
            total_logs: AtomicU64::new(0),
            successful_writes: AtomicU64::new(0),
            failed_writes: AtomicU64::new(0),
            buffered_logs: AtomicU64::new(0),
            dropped_logs: AtomicU64::new(0),
            replayed_logs: AtomicU64::new(0),
            quarantined_files: AtomicU64::new(0),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            alert_active: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }
}

impl SinkCounters {
    pub(crate) fn inc_total(&self) {
        self.total_logs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_successful(&self, n: usize) {
        self.successful_writes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_failed(&self, n: usize) {
        self.failed_writes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_buffered(&self, n: usize) {
        self.buffered_logs.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped(&self, n: usize) {
        self.dropped_logs.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_replayed(&self, n: usize) {
        self.replayed_logs.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn inc_quarantined(&self) {
        self.quarantined_files.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_alert(&self, active: bool) {
        self.alert_active.store(active, Ordering::Relaxed);
    }

    pub(crate) fn set_last_error(&self, error: impl fmt::Display) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(error.to_string());
        }
    }

    pub(crate) fn snapshot(&self, queue_depth: usize) -> SinkStats {
        SinkStats {
            total_logs: self.total_logs.load(Ordering::Relaxed),
            successful_writes: self.successful_writes.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            buffered_logs: self.buffered_logs.load(Ordering::Relaxed),
            dropped_logs: self.dropped_logs.load(Ordering::Relaxed),
            replayed_logs: self.replayed_logs.load(Ordering::Relaxed),
            quarantined_files: self.quarantined_files.load(Ordering::Relaxed),
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
            connection_state: self.state(),
            alert_active: self.alert_active.load(Ordering::Relaxed),
            queue_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_rate() {
        let counters = SinkCounters::default();
        assert_eq!(counters.snapshot(0).failure_rate(), 0.0);

        counters.add_successful(90);
        counters.add_failed(10);
        let stats = counters.snapshot(0);
        assert!((stats.failure_rate() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_state_round_trip_and_last_error() {
        let counters = SinkCounters::default();
        assert_eq!(counters.state(), ConnectionState::Disconnected);
        counters.set_state(ConnectionState::Connected);
        counters.set_last_error("boom");
        let stats = counters.snapshot(3);
        assert_eq!(stats.connection_state, ConnectionState::Connected);
        assert_eq!(stats.last_error.as_deref(), Some("boom"));
        assert_eq!(stats.queue_depth, 3);
    }
}
