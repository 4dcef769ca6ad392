//! Periodic health sampling for a sink.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sysinfo::System;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::stats::SinkStats;
use super::SinkShared;

/// Memory usage (percent) above which the monitor warns.
pub const MEMORY_WARN_PERCENT: f64 = 80.0;

/// One monitor sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub failure_rate: f64,
    pub memory_percent: f64,
    pub alert: bool,
    pub memory_pressure: bool,
}

/// Judge a stats snapshot against the alert threshold.
pub fn evaluate(stats: &SinkStats, memory_percent: f64, failure_threshold: f64) -> HealthReport {
    let failure_rate = stats.failure_rate();
    HealthReport {
        failure_rate,
        memory_percent,
        alert: failure_rate > failure_threshold,
        memory_pressure: memory_percent > MEMORY_WARN_PERCENT,
    }
}

fn memory_percent(system: &mut System) -> f64 {
    system.refresh_memory();
    let total = system.total_memory();
    if total == 0 {
        return 0.0;
    }
    system.used_memory() as f64 / total as f64 * 100.0
}

pub(crate) async fn run_monitor(
    shared: Arc<SinkShared>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // first tick fires immediately; nothing to report yet
    ticker.tick().await;
    let mut system = System::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let stats = shared.stats();
        let report = evaluate(
            &stats,
            memory_percent(&mut system),
            shared.config.alert_failure_threshold,
        );
        shared.counters.set_alert(report.alert);

        if report.alert {
            error!(
                target: "logbook::monitor",
                failure_rate = report.failure_rate,
                threshold = shared.config.alert_failure_threshold,
                failed_writes = stats.failed_writes,
                "log write failure rate above threshold"
            );
        }
        if report.memory_pressure {
            warn!(
                target: "logbook::monitor",
                memory_percent = report.memory_percent,
                "high memory usage"
            );
        }
        info!(
            target: "logbook::monitor",
            total_logs = stats.total_logs,
            successful_writes = stats.successful_writes,
            failed_writes = stats.failed_writes,
            buffered_logs = stats.buffered_logs,
            dropped_logs = stats.dropped_logs,
            queue_depth = stats.queue_depth,
            state = %stats.connection_state,
            "log sink stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::stats::ConnectionState;

    fn stats(successful: u64, failed: u64) -> SinkStats {
        SinkStats {
            total_logs: successful + failed,
            successful_writes: successful,
            failed_writes: failed,
            buffered_logs: 0,
            dropped_logs: 0,
            replayed_logs: 0,
            quarantined_files: 0,
            last_error: None,
            connection_state: ConnectionState::Connected,
            alert_active: false,
            queue_depth: 0,
        }
    }

    #[test]
    fn test_alert_above_threshold() {
        let report = evaluate(&stats(80, 20), 10.0, 10.0);
        assert!(report.alert);
        assert!(!report.memory_pressure);
        assert!((report.failure_rate - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_alert_at_threshold() {
        let report = evaluate(&stats(90, 10), 10.0, 10.0);
        assert!(!report.alert);
    }

    #[test]
    fn test_memory_pressure() {
        assert!(evaluate(&stats(1, 0), 85.0, 10.0).memory_pressure);
        assert!(!evaluate(&stats(0, 0), 80.0, 10.0).alert);
    }
}
