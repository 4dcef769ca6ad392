//! SurrealDB-backed [`LogStore`]

use async_trait::async_trait;
use tracing::debug;

use crate::handle::SurrealHandle;
use crate::schema::LogEvent;
use crate::storage_traits::{LogStore, StorageResult};

#[async_trait]
impl LogStore for SurrealHandle {
    async fn insert_batch(&self, events: &[LogEvent]) -> StorageResult<usize> {
        self.insert_events(events).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        SurrealHandle::health_check(self).await
    }

    async fn close(&self) -> StorageResult<()> {
        // the engine closes when the last clone of the client is dropped
        debug!(database = %self.database(), "log store closed");
        Ok(())
    }
}
