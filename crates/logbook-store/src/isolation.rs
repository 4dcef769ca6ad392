//! Disposable, fully provisioned databases for tests
//!
//! Every database-touching test gets its own uniquely named database
//! (`<database>_test_<8 hex>`) that is removed when the test finishes,
//! whether it passed, returned an error or panicked.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::handle::{DbConfig, SurrealHandle};
use crate::migrations::SchemaReport;
use crate::Result;

/// Unique test database name derived from the configured one
pub fn isolated_database_name(base: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_test_{}", base, &suffix[..8])
}

/// A provisioned throwaway database. Call [`IsolatedDatabase::drop_database`]
/// when done; dropping without it schedules a best-effort removal.
pub struct IsolatedDatabase {
    handle: SurrealHandle,
    name: String,
    schema: SchemaReport,
    dropped: bool,
}

impl IsolatedDatabase {
    /// Create and provision a fresh database next to `config.database`.
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn create(config: &DbConfig) -> Result<Self> {
        let name = isolated_database_name(&config.database);
        let db = SurrealHandle::open(config).await?;

        db.use_ns(&config.namespace)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        db.query(format!("DEFINE DATABASE {}", name))
            .await
            .and_then(|res| res.check())
            .map_err(|e| StoreError::SchemaSetup(format!("define database {}: {}", name, e)))?;
        db.use_db(&name)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let handle = SurrealHandle::from_parts(db, name.clone());
        let schema = handle.ensure_schema().await?;

        info!(database = %name, "isolated database ready");
        Ok(Self {
            handle,
            name,
            schema,
            dropped: false,
        })
    }

    pub fn handle(&self) -> &SurrealHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema objects created while provisioning
    pub fn schema(&self) -> &SchemaReport {
        &self.schema
    }

    /// Remove the database and everything in it.
    pub async fn drop_database(mut self) -> Result<()> {
        self.dropped = true;
        drop_database(&self.handle, &self.name).await
    }
}

impl Drop for IsolatedDatabase {
    fn drop(&mut self) {
        if self.dropped {
            return;
        }
        warn!(database = %self.name, "isolated database dropped without cleanup, scheduling removal");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let handle = self.handle.clone();
            let name = self.name.clone();
            runtime.spawn(async move {
                if let Err(e) = drop_database(&handle, &name).await {
                    warn!(database = %name, error = %e, "deferred database removal failed");
                }
            });
        }
    }
}

/// Provision a uniquely named database with the full schema.
pub async fn new_isolated_database(config: &DbConfig) -> Result<IsolatedDatabase> {
    IsolatedDatabase::create(config).await
}

/// Remove a database by name using an existing connection.
#[instrument(skip(handle))]
pub async fn drop_database(handle: &SurrealHandle, name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::Query(format!("refusing to drop database {:?}", name)));
    }
    handle
        .db
        .query(format!("REMOVE DATABASE IF EXISTS {}", name))
        .await
        .and_then(|res| res.check())
        .map_err(|e| StoreError::Query(format!("remove database {}: {}", name, e)))?;
    info!(database = %name, "database removed");
    Ok(())
}

/// Run `body` against a fresh isolated database and remove it afterwards.
///
/// A panic inside `body` still removes the database before the panic
/// resumes.
pub async fn with_isolated_database<F, Fut, T>(config: &DbConfig, body: F) -> Result<T>
where
    F: FnOnce(SurrealHandle) -> Fut,
    Fut: Future<Output = T>,
{
    let isolated = IsolatedDatabase::create(config).await?;
    let outcome = AssertUnwindSafe(body(isolated.handle().clone()))
        .catch_unwind()
        .await;
    let cleanup = isolated.drop_database().await;

    match outcome {
        Ok(value) => cleanup.map(|_| value),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
