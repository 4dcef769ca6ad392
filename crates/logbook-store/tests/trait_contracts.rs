//! Contract tests for `LogStore`.
//!
//! Every implementation must accept batches, ignore re-inserted ids and
//! report outages as errors. The SurrealDB handle runs the same checks
//! against an isolated database.

use logbook_store::fakes::{FlakyLogStore, MemoryLogStore};
use logbook_store::storage_traits::LogStore;
use logbook_store::{new_isolated_database, DbConfig, LogEvent, LogLevel, StoreError};

fn batch(n: usize) -> Vec<LogEvent> {
    (0..n)
        .map(|i| LogEvent::new(LogLevel::Info, format!("event {i}")).with_execution("exec", "job"))
        .collect()
}

async fn assert_accepts_and_dedups(store: &dyn LogStore) {
    let events = batch(3);
    assert_eq!(store.insert_batch(&events).await.unwrap(), 3);
    // replaying the same ids must not fail
    store.insert_batch(&events).await.unwrap();
    store.health_check().await.unwrap();
}

#[tokio::test]
async fn memory_store_contract() {
    let store = MemoryLogStore::new();
    assert_accepts_and_dedups(&store).await;
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn memory_store_rejects_after_close() {
    let store = MemoryLogStore::new();
    store.close().await.unwrap();
    assert!(store.is_closed());
    let err = store.insert_batch(&batch(1)).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
}

#[tokio::test]
async fn surreal_store_contract() {
    let isolated = new_isolated_database(&DbConfig::default()).await.unwrap();
    assert_accepts_and_dedups(isolated.handle()).await;
    assert_eq!(isolated.handle().count_events(Some("exec")).await.unwrap(), 3);
    isolated.drop_database().await.unwrap();
}

#[tokio::test]
async fn flaky_store_offline_then_online() {
    let store = FlakyLogStore::new(MemoryLogStore::new());
    store.set_available(false);

    assert!(store.health_check().await.is_err());
    assert!(matches!(
        store.insert_batch(&batch(2)).await.unwrap_err(),
        StoreError::Unavailable(_)
    ));
    assert!(store.inner().is_empty());

    store.set_available(true);
    assert_eq!(store.insert_batch(&batch(2)).await.unwrap(), 2);
    assert_eq!(store.inner().len(), 2);
    assert_eq!(store.insert_attempts(), 2);
}

#[tokio::test]
async fn flaky_store_scheduled_failures_run_out() {
    let store = FlakyLogStore::new(MemoryLogStore::new());
    store.fail_next_inserts(2);

    assert!(store.insert_batch(&batch(1)).await.is_err());
    assert!(store.insert_batch(&batch(1)).await.is_err());
    assert!(store.insert_batch(&batch(1)).await.is_ok());
    assert_eq!(store.inner().len(), 1);
}
