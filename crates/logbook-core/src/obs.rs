//! Structured observability hooks for the log pipeline.
//!
//! This module provides:
//! - Execution-scoped tracing spans, carrying `execution_id` and `script_name`
//!   so [`crate::sink::SinkLayer`] can attach them to every event inside
//! - Emission functions for lifecycle events: run start/finish, sink
//!   start/stop, batches sent to the disk buffer, replay passes
//!
//! Events are emitted under this crate's target, which the sink layer never
//! forwards back into the sink.

use std::path::Path;

use tracing::{info, warn};

use crate::sink::{ReplayReport, SinkStats};

/// Name of the span opened around an execution.
pub const EXECUTION_SPAN: &str = "logbook.execution";

/// Span tagged with the execution identity.
///
/// # Example
///
/// ```ignore
/// let span = execution_span("etl_20240101_120000_1a2b3c4d", "etl");
/// async { tracing::info!("loaded rows") }.instrument(span).await;
/// ```
pub fn execution_span(execution_id: &str, script_name: &str) -> tracing::Span {
    tracing::info_span!(
        "logbook.execution",
        execution_id = %execution_id,
        script_name = %script_name
    )
}

/// RAII guard that enters an execution span on the current thread.
///
/// For synchronous code only; async code should use
/// `tracing::Instrument::instrument` with [`execution_span`].
pub struct ExecutionSpan {
    _span: tracing::span::EnteredSpan,
}

impl ExecutionSpan {
    pub fn enter(execution_id: &str, script_name: &str) -> Self {
        Self {
            _span: execution_span(execution_id, script_name).entered(),
        }
    }
}

/// Emit event: run started.
pub fn emit_run_started(execution_id: &str, script_name: &str) {
    info!(event = "run.started", execution_id = %execution_id, script_name = %script_name);
}

/// Emit event: run finished with duration and outcome.
pub fn emit_run_finished(execution_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "run.finished",
        execution_id = %execution_id,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: run bookkeeping could not be finalised (warning level).
pub fn emit_run_finalize_error(execution_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.finalize_error", execution_id = %execution_id, error = %error);
}

pub fn emit_sink_started(buffer_dir: &Path, connected: bool) {
    info!(
        event = "sink.started",
        buffer_dir = %buffer_dir.display(),
        connected = connected,
    );
}

/// Emit event: a batch went to the disk buffer after retries ran out.
pub fn emit_batch_buffered(path: &Path, records: usize, error: &dyn std::fmt::Display) {
    warn!(
        event = "sink.batch_buffered",
        path = %path.display(),
        records = records,
        error = %error,
    );
}

pub fn emit_replay_finished(report: &ReplayReport) {
    info!(
        event = "sink.replay_finished",
        files_replayed = report.files_replayed,
        records_replayed = report.records_replayed,
        files_quarantined = report.files_quarantined,
        files_remaining = report.files_remaining,
        interrupted = report.interrupted,
    );
}

pub fn emit_sink_stopped(stats: &SinkStats) {
    info!(
        event = "sink.stopped",
        total_logs = stats.total_logs,
        successful_writes = stats.successful_writes,
        failed_writes = stats.failed_writes,
        buffered_logs = stats.buffered_logs,
        dropped_logs = stats.dropped_logs,
        replayed_logs = stats.replayed_logs,
    );
}
