//! Log sink against a real (in-memory) SurrealDB database.
//!
//! Covers the delivery path, an outage with disk buffering and replay, the
//! buffer quota and the process-wide default sink.

use std::sync::Arc;
use std::time::Duration;

use logbook_core::{
    default_sink, init_default_sink, ConnectionState, LogRecord, LogSink, LogbookError, SinkConfig,
};
use logbook_store::fakes::FlakyLogStore;
use logbook_store::{new_isolated_database, DbConfig, IsolatedDatabase, LogLevel, SurrealHandle};

fn config(dir: &std::path::Path) -> SinkConfig {
    SinkConfig::default()
        .with_buffer_dir(dir)
        .with_batching(20, Duration::from_millis(100))
        .with_retry(2, Duration::from_millis(5), Duration::from_millis(10))
        .with_monitoring(false, Duration::from_secs(60))
}

async fn database() -> IsolatedDatabase {
    new_isolated_database(&DbConfig::default()).await.unwrap()
}

#[tokio::test]
async fn records_reach_the_database() {
    let db = database().await;
    let tmp = tempfile::tempdir().unwrap();
    let handle = db.handle().clone();
    let sink = LogSink::start(config(tmp.path()), Arc::new(handle.clone()))
        .await
        .unwrap();

    for i in 0..45 {
        sink.write(
            LogRecord::info(format!("step {i}"))
                .with_execution("exec-sink")
                .with_script("pipeline")
                .with_tag("batch"),
        );
    }
    sink.write(LogRecord::error("step failed").with_execution("exec-sink"));
    let outcome = sink.flush().await;
    assert_eq!(outcome.buffered, 0);

    assert_eq!(handle.count_events(Some("exec-sink")).await.unwrap(), 46);
    let levels = handle.level_counts("exec-sink").await.unwrap();
    assert_eq!(levels.get("INFO"), Some(&45));
    assert_eq!(levels.get("ERROR"), Some(&1));

    let stats = sink.stop().await;
    assert_eq!(stats.successful_writes, 46);
    assert_eq!(stats.buffered_logs, 0);
    assert!(sink.buffer().pending_files().await.unwrap().is_empty());
    db.drop_database().await.unwrap();
}

#[tokio::test]
async fn outage_is_buffered_then_replayed() {
    let db = database().await;
    let tmp = tempfile::tempdir().unwrap();
    let handle = db.handle().clone();
    let store = Arc::new(FlakyLogStore::new(handle.clone()));
    let sink = LogSink::start(config(tmp.path()), store.clone()).await.unwrap();

    sink.write(LogRecord::info("before outage").with_execution("exec-outage"));
    sink.flush().await;

    store.set_available(false);
    for i in 0..5 {
        sink.write(LogRecord::warning(format!("during outage {i}")).with_execution("exec-outage"));
    }
    let outcome = sink.flush().await;
    assert_eq!(outcome.buffered, 5);
    assert_eq!(sink.buffer().pending_files().await.unwrap().len(), 1);
    assert_eq!(sink.stats().buffered_logs, 5);
    assert_eq!(sink.stats().connection_state, ConnectionState::Disconnected);
    assert_eq!(handle.count_events(Some("exec-outage")).await.unwrap(), 1);

    store.set_available(true);
    let report = sink.replay_buffered().await;
    assert_eq!(report.files_replayed, 1);
    assert_eq!(report.records_replayed, 5);
    assert!(!report.interrupted);

    assert!(sink.buffer().pending_files().await.unwrap().is_empty());
    assert!(sink.buffer().quarantined_files().await.unwrap().is_empty());
    assert_eq!(handle.count_events(Some("exec-outage")).await.unwrap(), 6);

    let stats = sink.stop().await;
    assert_eq!(stats.replayed_logs, 5);
    db.drop_database().await.unwrap();
}

#[tokio::test]
async fn quarantined_file_replays_after_restore() {
    let db = database().await;
    let tmp = tempfile::tempdir().unwrap();
    let handle = db.handle().clone();
    let store = Arc::new(FlakyLogStore::new(handle.clone()));
    let sink = LogSink::start(config(tmp.path()), store.clone()).await.unwrap();

    store.set_available(false);
    for i in 0..3 {
        sink.write(LogRecord::info(format!("r{i}")).with_execution("exec-restore"));
    }
    sink.flush().await;

    // a failing replay quarantines the file
    let report = sink.replay_buffered().await;
    assert_eq!(report.files_quarantined, 1);
    assert_eq!(sink.buffer().quarantined_files().await.unwrap().len(), 1);

    store.set_available(true);
    assert!(sink.replay_buffered().await.is_empty());
    assert_eq!(sink.restore_quarantined().await.unwrap(), 1);
    let report = sink.replay_buffered().await;
    assert_eq!(report.records_replayed, 3);
    assert_eq!(handle.count_events(Some("exec-restore")).await.unwrap(), 3);

    sink.stop().await;
    db.drop_database().await.unwrap();
}

#[tokio::test]
async fn quota_guard_trims_buffer() {
    let tmp = tempfile::tempdir().unwrap();
    let handle = SurrealHandle::in_memory().await.unwrap();
    let store = Arc::new(FlakyLogStore::new(handle));
    store.set_available(false);

    let mut cfg = config(tmp.path());
    cfg.max_buffer_size_mb = 0;
    let sink = LogSink::start(cfg, store).await.unwrap();

    sink.write(LogRecord::new(LogLevel::Info, "doomed"));
    let outcome = sink.flush().await;
    assert_eq!(outcome.buffered, 1);
    assert_eq!(sink.buffer().total_size().await.unwrap(), 0);
    assert!(sink.buffer().pending_files().await.unwrap().is_empty());
    sink.stop().await;
}

#[tokio::test]
async fn default_sink_installs_once() {
    let tmp = tempfile::tempdir().unwrap();
    let handle = SurrealHandle::in_memory().await.unwrap();
    let sink = LogSink::start(config(tmp.path()), Arc::new(handle))
        .await
        .unwrap();

    let installed = init_default_sink(sink.clone()).unwrap();
    installed.write(LogRecord::info("through the default sink"));
    assert!(default_sink().is_some());
    assert!(matches!(
        init_default_sink(sink.clone()),
        Err(LogbookError::SinkAlreadyInitialised)
    ));

    let stats = sink.stop().await;
    assert_eq!(stats.total_logs, 1);
    assert_eq!(stats.successful_writes, 1);
}
