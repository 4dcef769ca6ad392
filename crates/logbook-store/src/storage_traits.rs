//! Storage trait definitions for the ingestion path
//!
//! The log sink only needs three things from a backend: bulk insert, a
//! liveness probe and an orderly close. Keeping that behind `LogStore`
//! lets the sink run against SurrealDB in production and against the
//! in-memory or flaky fakes in the `fakes` module during tests.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::schema::LogEvent;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StoreError>;

/// Destination for batches of log events.
///
/// Guarantees:
/// - `insert_batch` is all-or-nothing from the caller's point of view: an
///   `Err` means the batch must be retried or buffered.
/// - Re-inserting events with ids that are already stored does not
///   duplicate them.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist a batch, returning how many events were accepted.
    async fn insert_batch(&self, events: &[LogEvent]) -> StorageResult<usize>;

    /// Verify the backend is reachable.
    async fn health_check(&self) -> StorageResult<()>;

    /// Release backend resources. Further inserts may fail.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
