//! The log sink: non-blocking ingestion into a [`LogStore`].
//!
//! `write` only enqueues. Three background tasks do the rest:
//!
//! - the consumer pulls records off the bounded queue into the current batch
//!   and flushes when the batch is full or the queue has been idle for one
//!   flush interval
//! - the periodic flusher pushes out partial batches every flush interval
//! - the monitor samples failure rate and memory usage
//!
//! A flush writes the batch in `batch_size` chunks with exponential backoff.
//! Chunks that exhaust their attempts go to the [`DiskBuffer`]; after every
//! clean flush the buffered files are replayed, oldest first.

mod buffer;
mod layer;
mod monitor;
mod record;
mod retry;
mod stats;

pub use buffer::{enforce_quota, DiskBuffer, QuotaOutcome, QUARANTINE_DIR};
pub use layer::SinkLayer;
pub use monitor::{evaluate, HealthReport, MEMORY_WARN_PERCENT};
pub use record::LogRecord;
pub use retry::RetryPolicy;
pub use stats::{ConnectionState, SinkStats};

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use logbook_store::{LogEvent, LogStore, StoreError};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::SinkConfig;
use crate::error::{LogbookError, Result};
use crate::obs;
use stats::SinkCounters;

/// Target for diagnostics about records the sink could not take.
///
/// [`SinkLayer`] never forwards events from this target.
pub const FALLBACK_TARGET: &str = "logbook::fallback";

/// What one flush did with the batch it took.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlushOutcome {
    /// Records accepted by the store
    pub written: usize,
    /// Records moved to the disk buffer
    pub buffered: usize,
    /// Records lost because the disk buffer could not be written either
    pub lost: usize,
    /// Replay pass run after a clean flush
    pub replay: Option<ReplayReport>,
}

/// Result of one pass over the disk buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub files_replayed: usize,
    pub records_replayed: usize,
    pub files_quarantined: usize,
    pub empty_files_removed: usize,
    /// Files left for a later pass because the store failed mid-pass
    pub files_remaining: usize,
    pub interrupted: bool,
}

impl ReplayReport {
    pub fn is_empty(&self) -> bool {
        self.files_replayed == 0
            && self.files_quarantined == 0
            && self.empty_files_removed == 0
            && !self.interrupted
    }
}

enum Envelope {
    Record(LogEvent),
    Flush(oneshot::Sender<FlushOutcome>),
}

/// State shared between the sink handle and its background tasks.
pub(crate) struct SinkShared {
    pub(crate) config: SinkConfig,
    pub(crate) counters: SinkCounters,
    store: Arc<dyn LogStore>,
    buffer: DiskBuffer,
    retry: RetryPolicy,
    sender: mpsc::Sender<Envelope>,
    batch: Mutex<Vec<LogEvent>>,
    flush_lock: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
}

impl SinkShared {
    pub(crate) fn stats(&self) -> SinkStats {
        let depth = self
            .config
            .queue_capacity
            .saturating_sub(self.sender.capacity());
        self.counters.snapshot(depth)
    }

    /// Append to the batch; true once it has reached `batch_size`.
    fn push(&self, event: LogEvent) -> bool {
        match self.batch.lock() {
            Ok(mut batch) => {
                batch.push(event);
                batch.len() >= self.config.batch_size
            }
            Err(_) => false,
        }
    }

    fn batch_len(&self) -> usize {
        self.batch.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn take_batch(&self) -> Vec<LogEvent> {
        self.batch
            .lock()
            .map(|mut b| std::mem::take(&mut *b))
            .unwrap_or_default()
    }

    // ========== Flush ==========

    async fn flush(&self) -> FlushOutcome {
        let _guard = self.flush_lock.lock().await;
        let batch = self.take_batch();
        let mut outcome = FlushOutcome::default();
        if batch.is_empty() {
            return outcome;
        }

        for chunk in batch.chunks(self.config.batch_size) {
            match self.write_with_retry(chunk).await {
                Ok(()) => outcome.written += chunk.len(),
                Err(err) => self.buffer_chunk(chunk, &err, &mut outcome).await,
            }
        }
        debug!(
            written = outcome.written,
            buffered = outcome.buffered,
            "batch flushed"
        );

        if outcome.buffered == 0 && outcome.lost == 0 {
            outcome.replay = Some(self.replay_pending().await);
        }
        outcome
    }

    async fn write_with_retry(&self, chunk: &[LogEvent]) -> std::result::Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt_insert(chunk).await {
                Ok(()) => {
                    self.counters.add_successful(chunk.len());
                    return Ok(());
                }
                Err(err) => {
                    self.counters.add_failed(chunk.len());
                    self.counters.set_last_error(&err);
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        records = chunk.len(),
                        error = %err,
                        "batch insert failed"
                    );
                    if !self.retry.has_next(attempt) {
                        return Err(err);
                    }
                    self.backoff(self.retry.delay_after(attempt)).await;
                }
            }
        }
    }

    /// One insert, preceded by a health check unless already connected.
    async fn attempt_insert(&self, chunk: &[LogEvent]) -> std::result::Result<(), StoreError> {
        if self.counters.state() != ConnectionState::Connected {
            self.counters.set_state(ConnectionState::Connecting);
            if let Err(err) = self.store.health_check().await {
                self.counters.set_state(ConnectionState::Disconnected);
                return Err(err);
            }
            self.counters.set_state(ConnectionState::Connected);
        }
        match self.store.insert_batch(chunk).await {
            Ok(_) => Ok(()),
            Err(err) => {
                self.counters.set_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Sleep between attempts; cut short by shutdown.
    async fn backoff(&self, delay: std::time::Duration) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }
    }

    async fn buffer_chunk(&self, chunk: &[LogEvent], cause: &StoreError, outcome: &mut FlushOutcome) {
        self.counters.set_state(ConnectionState::Disconnected);
        match self.buffer.write_batch(chunk).await {
            Ok(path) => {
                self.counters.add_buffered(chunk.len());
                outcome.buffered += chunk.len();
                obs::emit_batch_buffered(&path, chunk.len(), cause);
                self.guard_quota().await;
            }
            Err(err) => {
                self.counters.add_dropped(chunk.len());
                self.counters.set_last_error(&err);
                outcome.lost += chunk.len();
                error!(
                    target: FALLBACK_TARGET,
                    records = chunk.len(),
                    error = %err,
                    "disk buffer write failed, records lost"
                );
            }
        }
    }

    async fn guard_quota(&self) {
        if let Err(err) = self.buffer.enforce_quota(self.config.max_buffer_bytes()).await {
            warn!(error = %err, "disk buffer quota check failed");
        }
    }

    // ========== Replay ==========

    async fn replay_pending(&self) -> ReplayReport {
        let mut report = ReplayReport::default();
        let files = match self.buffer.pending_files().await {
            Ok(files) => files,
            Err(err) => {
                warn!(error = %err, "could not list disk buffer");
                return report;
            }
        };
        if files.is_empty() {
            return report;
        }

        for (idx, path) in files.iter().enumerate() {
            let events = match self.buffer.read_file(path).await {
                Ok(events) => events,
                Err(err) => {
                    error!(path = %path.display(), error = %err, "unreadable buffer file");
                    self.quarantine(path, &mut report).await;
                    continue;
                }
            };

            if events.is_empty() {
                if let Err(err) = self.buffer.remove(path).await {
                    warn!(path = %path.display(), error = %err, "could not remove empty buffer file");
                }
                report.empty_files_removed += 1;
                continue;
            }

            match self.replay_file(&events).await {
                Ok(()) => {
                    if let Err(err) = self.buffer.remove(path).await {
                        warn!(path = %path.display(), error = %err, "could not remove replayed buffer file");
                    }
                    report.files_replayed += 1;
                    report.records_replayed += events.len();
                }
                Err(err) => {
                    self.counters.set_last_error(&err);
                    self.counters.set_state(ConnectionState::Disconnected);
                    warn!(path = %path.display(), error = %err, "buffer replay failed");
                    self.quarantine(path, &mut report).await;
                    report.interrupted = true;
                    report.files_remaining = files.len() - idx - 1;
                    break;
                }
            }
        }

        obs::emit_replay_finished(&report);
        report
    }

    /// Single attempt per chunk; stops at the first failure.
    async fn replay_file(&self, events: &[LogEvent]) -> std::result::Result<(), StoreError> {
        for chunk in events.chunks(self.config.batch_size) {
            match self.attempt_insert(chunk).await {
                Ok(()) => {
                    self.counters.add_successful(chunk.len());
                    self.counters.add_replayed(chunk.len());
                }
                Err(err) => {
                    self.counters.add_failed(chunk.len());
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn quarantine(&self, path: &Path, report: &mut ReplayReport) {
        match self.buffer.quarantine(path).await {
            Ok(_) => {
                self.counters.inc_quarantined();
                report.files_quarantined += 1;
            }
            Err(err) => error!(path = %path.display(), error = %err, "could not quarantine buffer file"),
        }
    }
}

// ========== Background Tasks ==========

async fn run_consumer(
    shared: Arc<SinkShared>,
    mut rx: mpsc::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = shared.config.flush_interval;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = tokio::time::timeout(interval, rx.recv()) => match received {
                Ok(Some(Envelope::Record(event))) => {
                    if shared.push(event) {
                        shared.flush().await;
                    }
                }
                Ok(Some(Envelope::Flush(reply))) => {
                    let outcome = shared.flush().await;
                    let _ = reply.send(outcome);
                }
                Ok(None) => break,
                Err(_idle) => {
                    if shared.batch_len() > 0 {
                        shared.flush().await;
                    }
                }
            }
        }
    }

    // drain whatever was queued before shutdown
    let mut waiting = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        match envelope {
            Envelope::Record(event) => {
                shared.push(event);
            }
            Envelope::Flush(reply) => waiting.push(reply),
        }
    }
    let outcome = shared.flush().await;
    for reply in waiting {
        let _ = reply.send(outcome.clone());
    }
}

async fn run_periodic_flush(shared: Arc<SinkShared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(shared.config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if shared.batch_len() > 0 {
                    shared.flush().await;
                }
            }
        }
    }
}

// ========== Sink Handle ==========

struct SinkInner {
    shared: Arc<SinkShared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Drop for SinkInner {
    fn drop(&mut self) {
        // background tasks only hold the shared state; tell them to finish
        let _ = self.shared.shutdown.send(true);
    }
}

/// Non-blocking, batching log sink. Cheap to clone.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("buffer_dir", &self.inner.shared.config.buffer_dir)
            .field("stats", &self.stats())
            .finish()
    }
}

impl LogSink {
    /// Validate the config, probe the store and spawn the background tasks.
    pub async fn start(config: SinkConfig, store: Arc<dyn LogStore>) -> Result<Self> {
        config.validate()?;
        let buffer = DiskBuffer::new(&config.buffer_dir);
        buffer.ensure_dirs().await?;

        let (sender, rx) = mpsc::channel(config.queue_capacity);
        let (shutdown, _) = watch::channel(false);
        let retry = RetryPolicy::new(
            config.max_retries,
            config.retry_base_delay,
            config.retry_max_delay,
        );

        let shared = Arc::new(SinkShared {
            counters: SinkCounters::default(),
            store,
            buffer,
            retry,
            sender,
            batch: Mutex::new(Vec::with_capacity(config.batch_size)),
            flush_lock: tokio::sync::Mutex::new(()),
            shutdown,
            config,
        });

        shared.counters.set_state(ConnectionState::Connecting);
        let connected = match shared.store.health_check().await {
            Ok(()) => {
                shared.counters.set_state(ConnectionState::Connected);
                true
            }
            Err(err) => {
                shared.counters.set_state(ConnectionState::Disconnected);
                shared.counters.set_last_error(&err);
                warn!(error = %err, "log store unreachable at start, records will be buffered");
                false
            }
        };

        let mut tasks = vec![
            tokio::spawn(run_consumer(
                Arc::clone(&shared),
                rx,
                shared.shutdown.subscribe(),
            )),
            tokio::spawn(run_periodic_flush(
                Arc::clone(&shared),
                shared.shutdown.subscribe(),
            )),
        ];
        if shared.config.enable_monitoring {
            tasks.push(tokio::spawn(monitor::run_monitor(
                Arc::clone(&shared),
                shared.config.monitor_interval,
                shared.shutdown.subscribe(),
            )));
        }

        obs::emit_sink_started(&shared.config.buffer_dir, connected);
        Ok(Self {
            inner: Arc::new(SinkInner {
                shared,
                tasks: Mutex::new(tasks),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    /// Enqueue a record. Never blocks and never fails; a full queue or a
    /// stopped sink drops the record and counts it.
    pub fn write(&self, record: LogRecord) {
        self.write_event(record.into_event());
    }

    /// Enqueue an already-built event.
    pub fn write_event(&self, event: LogEvent) {
        let shared = &self.inner.shared;
        shared.counters.inc_total();

        if self.inner.stopped.load(Ordering::Acquire) {
            shared.counters.add_dropped(1);
            warn!(target: FALLBACK_TARGET, level = %event.level, message = %event.message, "log sink stopped, record dropped");
            return;
        }

        match shared.sender.try_send(Envelope::Record(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(Envelope::Record(event)))
            | Err(TrySendError::Closed(Envelope::Record(event))) => {
                shared.counters.add_dropped(1);
                warn!(target: FALLBACK_TARGET, level = %event.level, message = %event.message, "log queue full, record dropped");
            }
            Err(_) => {
                shared.counters.add_dropped(1);
            }
        }
    }

    /// Push out everything written so far and wait for the result.
    pub async fn flush(&self) -> FlushOutcome {
        let shared = &self.inner.shared;
        if !self.inner.stopped.load(Ordering::Acquire) {
            let (reply, response) = oneshot::channel();
            if shared.sender.send(Envelope::Flush(reply)).await.is_ok() {
                if let Ok(outcome) = response.await {
                    return outcome;
                }
            }
        }
        shared.flush().await
    }

    /// Replay the disk buffer now, under the flush lock.
    pub async fn replay_buffered(&self) -> ReplayReport {
        let shared = &self.inner.shared;
        let _guard = shared.flush_lock.lock().await;
        shared.replay_pending().await
    }

    /// Return quarantined files to the replay queue.
    pub async fn restore_quarantined(&self) -> Result<usize> {
        let shared = &self.inner.shared;
        let _guard = shared.flush_lock.lock().await;
        Ok(shared.buffer.restore_quarantined().await?)
    }

    pub fn stats(&self) -> SinkStats {
        self.inner.shared.stats()
    }

    pub fn config(&self) -> &SinkConfig {
        &self.inner.shared.config
    }

    pub fn buffer(&self) -> &DiskBuffer {
        &self.inner.shared.buffer
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Drain the queue, flush, close the store. Later calls only report stats.
    pub async fn stop(&self) -> SinkStats {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return self.stats();
        }
        let shared = &self.inner.shared;
        let _ = shared.shutdown.send(true);

        let tasks = self
            .inner
            .tasks
            .lock()
            .map(|mut t| std::mem::take(&mut *t))
            .unwrap_or_default();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "sink task ended abnormally");
            }
        }

        shared.flush().await;
        if let Err(err) = shared.store.close().await {
            warn!(error = %err, "log store close failed");
        }
        shared.counters.set_state(ConnectionState::Disconnected);

        let stats = self.stats();
        obs::emit_sink_stopped(&stats);
        info!(buffered = stats.buffered_logs, dropped = stats.dropped_logs, "log sink stopped");
        stats
    }
}

// ========== Default Sink ==========

static DEFAULT_SINK: OnceLock<LogSink> = OnceLock::new();

/// Install the process-wide default sink. Only the first call succeeds.
pub fn init_default_sink(sink: LogSink) -> Result<&'static LogSink> {
    DEFAULT_SINK
        .set(sink)
        .map_err(|_| LogbookError::SinkAlreadyInitialised)?;
    DEFAULT_SINK.get().ok_or(LogbookError::SinkAlreadyInitialised)
}

pub fn default_sink() -> Option<&'static LogSink> {
    DEFAULT_SINK.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use logbook_store::fakes::{FlakyLogStore, MemoryLogStore};
    use logbook_store::LogLevel;
    use std::time::Duration;

    fn config(dir: &Path) -> SinkConfig {
        SinkConfig::default()
            .with_buffer_dir(dir)
            .with_batching(10, Duration::from_millis(50))
            .with_retry(2, Duration::from_millis(1), Duration::from_millis(2))
            .with_monitoring(false, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_write_flush_delivers_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryLogStore::new());
        let sink = LogSink::start(config(tmp.path()), store.clone()).await.unwrap();

        for i in 0..25 {
            sink.write(LogRecord::info(format!("line {i}")).with_execution("exec-1"));
        }
        let outcome = sink.flush().await;
        assert!(outcome.buffered == 0 && outcome.lost == 0);

        let messages: Vec<String> = store.events().into_iter().map(|e| e.message).collect();
        let expected: Vec<String> = (0..25).map(|i| format!("line {i}")).collect();
        assert_eq!(messages, expected);

        let stats = sink.stats();
        assert_eq!(stats.total_logs, 25);
        assert_eq!(stats.successful_writes, 25);
        assert_eq!(stats.connection_state, ConnectionState::Connected);
        assert!(sink.buffer().pending_files().await.unwrap().is_empty());
        sink.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_store_buffers_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyLogStore::new(MemoryLogStore::new()));
        store.set_available(false);
        let sink = LogSink::start(config(tmp.path()), store.clone()).await.unwrap();
        assert_eq!(sink.stats().connection_state, ConnectionState::Disconnected);

        for i in 0..4 {
            sink.write(LogRecord::warning(format!("w{i}")));
        }
        let outcome = sink.flush().await;
        assert_eq!(outcome.buffered, 4);
        assert!(outcome.replay.is_none());

        let stats = sink.stats();
        assert_eq!(stats.buffered_logs, 4);
        assert_eq!(stats.failed_writes, 8);
        assert_eq!(stats.connection_state, ConnectionState::Disconnected);
        assert!(stats.last_error.is_some());
        assert_eq!(sink.buffer().pending_files().await.unwrap().len(), 1);
        assert!(store.inner().is_empty());
        sink.stop().await;
    }

    #[tokio::test]
    async fn test_retry_recovers_without_buffering() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyLogStore::new(MemoryLogStore::new()));
        let sink = LogSink::start(config(tmp.path()), store.clone()).await.unwrap();

        store.fail_next_inserts(1);
        sink.write(LogRecord::info("once"));
        let outcome = sink.flush().await;

        assert_eq!(outcome.written, 1);
        assert_eq!(outcome.buffered, 0);
        let stats = sink.stats();
        assert_eq!(stats.failed_writes, 1);
        assert_eq!(stats.successful_writes, 1);
        assert_eq!(store.inner().len(), 1);
        sink.stop().await;
    }

    #[tokio::test]
    async fn test_successful_flush_replays_buffer() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyLogStore::new(MemoryLogStore::new()));
        let sink = LogSink::start(config(tmp.path()), store.clone()).await.unwrap();

        store.set_available(false);
        for i in 0..3 {
            sink.write(LogRecord::error(format!("lost {i}")));
        }
        sink.flush().await;
        assert_eq!(sink.buffer().pending_files().await.unwrap().len(), 1);

        store.set_available(true);
        sink.write(LogRecord::info("back"));
        let outcome = sink.flush().await;
        let replay = outcome.replay.expect("replay after clean flush");
        assert_eq!(replay.files_replayed, 1);
        assert_eq!(replay.records_replayed, 3);

        assert_eq!(store.inner().len(), 4);
        assert!(sink.buffer().pending_files().await.unwrap().is_empty());
        assert_eq!(sink.stats().replayed_logs, 3);
        sink.stop().await;
    }

    #[tokio::test]
    async fn test_corrupt_buffer_file_is_quarantined() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryLogStore::new());
        let sink = LogSink::start(config(tmp.path()), store.clone()).await.unwrap();

        let bad = tmp.path().join("buffer_20240101_000000_000000000.jsonl");
        tokio::fs::write(&bad, "not json\n").await.unwrap();
        let empty = tmp.path().join("buffer_20240101_000000_000000001.jsonl");
        tokio::fs::write(&empty, "").await.unwrap();

        let report = sink.replay_buffered().await;
        assert_eq!(report.files_quarantined, 1);
        assert_eq!(report.empty_files_removed, 1);
        assert!(sink.buffer().pending_files().await.unwrap().is_empty());
        assert_eq!(sink.buffer().quarantined_files().await.unwrap().len(), 1);
        assert_eq!(sink.stats().quarantined_files, 1);
        sink.stop().await;
    }

    #[tokio::test]
    async fn test_replay_failure_quarantines_and_stops_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyLogStore::new(MemoryLogStore::new()));
        let sink = LogSink::start(config(tmp.path()), store.clone()).await.unwrap();

        let buffer = DiskBuffer::new(tmp.path());
        buffer
            .write_batch(&[LogEvent::new(LogLevel::Info, "a")])
            .await
            .unwrap();
        buffer
            .write_batch(&[LogEvent::new(LogLevel::Info, "b")])
            .await
            .unwrap();

        store.set_available(false);
        let report = sink.replay_buffered().await;
        assert!(report.interrupted);
        assert_eq!(report.files_quarantined, 1);
        assert_eq!(report.files_remaining, 1);
        assert_eq!(sink.buffer().pending_files().await.unwrap().len(), 1);
        assert_eq!(sink.stats().connection_state, ConnectionState::Disconnected);

        store.set_available(true);
        let report = sink.replay_buffered().await;
        assert_eq!(report.files_replayed, 1);
        assert_eq!(store.inner().len(), 1);
        sink.stop().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryLogStore::new());
        let cfg = config(tmp.path()).with_queue_capacity(2);
        let sink = LogSink::start(cfg, store).await.unwrap();

        // single-threaded test runtime: the consumer cannot run between writes
        for i in 0..5 {
            sink.write(LogRecord::info(format!("{i}")));
        }
        let stats = sink.stats();
        assert_eq!(stats.total_logs, 5);
        assert_eq!(stats.dropped_logs, 3);
        assert_eq!(stats.queue_depth, 2);
        sink.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_and_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryLogStore::new());
        let sink = LogSink::start(config(tmp.path()), store.clone()).await.unwrap();

        for i in 0..7 {
            sink.write(LogRecord::debug(format!("{i}")));
        }
        let stats = sink.stop().await;
        assert_eq!(stats.successful_writes, 7);
        assert_eq!(store.len(), 7);
        assert!(store.is_closed());
        assert!(sink.is_stopped());

        let again = sink.stop().await;
        assert_eq!(again.successful_writes, 7);

        sink.write(LogRecord::info("late"));
        assert_eq!(sink.stats().dropped_logs, 1);
    }

    #[tokio::test]
    async fn test_consumer_flushes_full_batch_on_its_own() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryLogStore::new());
        let cfg = config(tmp.path()).with_batching(3, Duration::from_secs(30));
        let sink = LogSink::start(cfg, store.clone()).await.unwrap();

        for i in 0..3 {
            sink.write(LogRecord::info(format!("{i}")));
        }
        for _ in 0..50 {
            if store.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.len(), 3);
        sink.stop().await;
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path()).with_queue_capacity(0);
        let result = LogSink::start(cfg, Arc::new(MemoryLogStore::new())).await;
        assert!(matches!(result, Err(LogbookError::InvalidConfig(_))));
    }
}
