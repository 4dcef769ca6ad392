//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryLogStore`, which keeps batches in a `Vec`, and
//! `FlakyLogStore`, a wrapper that can be switched offline or told to fail
//! a number of upcoming calls to exercise retry and buffering paths.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::schema::LogEvent;
use crate::storage_traits::{LogStore, StorageResult};

// ---------------------------------------------------------------------------
// MemoryLogStore
// ---------------------------------------------------------------------------

/// In-memory log store with id-based de-duplication.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    events: Mutex<Vec<LogEvent>>,
    closed: AtomicBool,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored so far, in insertion order.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn insert_batch(&self, events: &[LogEvent]) -> StorageResult<usize> {
        if self.is_closed() {
            return Err(StoreError::Unavailable("store closed".to_string()));
        }
        let mut stored = self.events.lock().unwrap();
        let known: HashSet<String> = stored.iter().map(|e| e.id.clone()).collect();
        let fresh: Vec<LogEvent> = events
            .iter()
            .filter(|e| !known.contains(&e.id))
            .cloned()
            .collect();
        stored.extend(fresh);
        Ok(events.len())
    }

    async fn health_check(&self) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StoreError::Unavailable("store closed".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FlakyLogStore
// ---------------------------------------------------------------------------

/// Wrapper that fails on demand.
#[derive(Debug)]
pub struct FlakyLogStore<S> {
    inner: S,
    available: AtomicBool,
    fail_next: AtomicU32,
    insert_attempts: AtomicU64,
}

impl<S: LogStore> FlakyLogStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            available: AtomicBool::new(true),
            fail_next: AtomicU32::new(0),
            insert_attempts: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Take the backend offline (`false`) or bring it back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `n` insert calls, then behave normally.
    pub fn fail_next_inserts(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of `insert_batch` calls seen, successful or not.
    pub fn insert_attempts(&self) -> u64 {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    fn take_scheduled_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<S: LogStore> LogStore for FlakyLogStore<S> {
    async fn insert_batch(&self, events: &[LogEvent]) -> StorageResult<usize> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("backend offline".to_string()));
        }
        if self.take_scheduled_failure() {
            return Err(StoreError::Unavailable("scheduled failure".to_string()));
        }
        self.inner.insert_batch(events).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("backend offline".to_string()));
        }
        self.inner.health_check().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}
