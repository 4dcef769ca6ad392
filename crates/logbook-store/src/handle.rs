//! SurrealDB Handle - Connection management
//!
//! Supports in-memory (`mem://`), embedded (`surrealkv://`) and remote
//! (`ws://` / `wss://`) endpoints through the `any` engine. Query methods for
//! each table are implemented on [`SurrealHandle`] in the sibling modules:
//! - `events`: log_events insert, lookup and search
//! - `runs`: script_runs lifecycle
//! - `learnings`: agent_learnings
//! - `edges`: log_causality relations
//! - `retention`: pruning across all tables

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::migrations::{self, SchemaReport};
use crate::Result;

/// Default namespace for all Logbook databases
pub const DEFAULT_NAMESPACE: &str = "logbook";
/// Default database name
pub const DEFAULT_DATABASE: &str = "script_logs";

/// Connection settings for the log database
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Endpoint URL (e.g. "mem://", "surrealkv://.logbook/db", "wss://xxx.surrealdb.cloud")
    pub url: String,
    /// Namespace (default: "logbook")
    pub namespace: String,
    /// Database name (default: "script_logs")
    pub database: String,
    /// Optional sign-in username
    pub username: Option<String>,
    /// Optional sign-in password
    pub password: Option<String>,
    /// Whether the credentials belong to a root user (true) or database user (false)
    pub is_root: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "mem://".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            username: None,
            password: None,
            is_root: false,
        }
    }
}

impl DbConfig {
    /// Configuration for the given endpoint with default namespace/database
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Set sign-in credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set whether this is a root user
    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_URL (optional, default: "mem://")
    /// - SURREALDB_NAMESPACE (optional, default: "logbook")
    /// - SURREALDB_DATABASE (optional, default: "script_logs")
    /// - SURREALDB_USERNAME / SURREALDB_PASSWORD (optional, both required to sign in)
    /// - SURREALDB_ROOT (optional, default: "false") - set to "true" for root users
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let url = std::env::var("SURREALDB_URL").unwrap_or(defaults.url);
        let namespace = std::env::var("SURREALDB_NAMESPACE").unwrap_or(defaults.namespace);
        let database = std::env::var("SURREALDB_DATABASE").unwrap_or(defaults.database);
        let username = std::env::var("SURREALDB_USERNAME").ok();
        let password = std::env::var("SURREALDB_PASSWORD").ok();
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            url,
            namespace,
            database,
            username,
            password,
            is_root,
        }
    }
}

/// SurrealDB connection handle for Logbook
#[derive(Clone)]
pub struct SurrealHandle {
    pub(crate) db: Surreal<Any>,
    database: String,
}

impl std::fmt::Debug for SurrealHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealHandle")
            .field("database", &self.database)
            .finish()
    }
}

impl SurrealHandle {
    /// Open a connection, sign in and select namespace/database.
    ///
    /// Does not touch the schema; call [`SurrealHandle::ensure_schema`] for that.
    #[instrument(skip(config), fields(url = %config.url, namespace = %config.namespace, database = %config.database))]
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let db = Self::open(config).await?;

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;

        info!("SurrealDB connected");
        Ok(SurrealHandle {
            db,
            database: config.database.clone(),
        })
    }

    /// Connect and provision the schema in one step.
    pub async fn setup(config: &DbConfig) -> Result<Self> {
        let handle = Self::connect(config).await?;
        handle.ensure_schema().await?;
        Ok(handle)
    }

    /// Connect to a fresh in-memory database with the schema provisioned
    #[instrument(skip_all)]
    pub async fn in_memory() -> Result<Self> {
        Self::setup(&DbConfig::default()).await
    }

    /// Connect using environment variables (see [`DbConfig::from_env`])
    #[instrument(skip_all)]
    pub async fn setup_from_env() -> Result<Self> {
        Self::setup(&DbConfig::from_env()).await
    }

    /// Connect and authenticate without selecting a namespace.
    pub(crate) async fn open(config: &DbConfig) -> Result<Surreal<Any>> {
        let db = surrealdb::engine::any::connect(&config.url)
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to connect to {}: {}", config.url, e))
            })?;

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            if config.is_root {
                db.signin(Root { username, password })
                    .await
                    .map_err(|e| {
                        StoreError::Connection(format!("Root authentication failed: {}", e))
                    })?;
            } else {
                db.signin(Database {
                    namespace: &config.namespace,
                    database: &config.database,
                    username,
                    password,
                })
                .await
                .map_err(|e| {
                    StoreError::Connection(format!("Database authentication failed: {}", e))
                })?;
            }
        }

        Ok(db)
    }

    pub(crate) fn from_parts(db: Surreal<Any>, database: impl Into<String>) -> Self {
        SurrealHandle {
            db,
            database: database.into(),
        }
    }

    /// Name of the selected database
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Idempotently provision tables, indexes, view and graph.
    pub async fn ensure_schema(&self) -> Result<SchemaReport> {
        migrations::ensure_schema(&self.db, &self.database).await
    }

    /// Databases defined in the selected namespace
    #[instrument(skip(self))]
    pub async fn list_databases(&self) -> Result<Vec<String>> {
        let mut res = self.db.query("INFO FOR NS;").await?;
        let info: Option<serde_json::Value> = res.take(0)?;
        let mut names: Vec<String> = info
            .as_ref()
            .and_then(|v| v.get("databases"))
            .and_then(|v| v.as_object())
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    /// Round-trip to the server to verify the connection is usable.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        self.db
            .health()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        debug!("health check ok");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_targets_script_logs() {
        let config = DbConfig::default();
        assert_eq!(config.url, "mem://");
        assert_eq!(config.namespace, "logbook");
        assert_eq!(config.database, "script_logs");
        assert!(config.username.is_none());
    }

    #[test]
    fn test_config_builders() {
        let config = DbConfig::new("ws://localhost:8000")
            .with_namespace("ns")
            .with_database("db")
            .with_credentials("root", "secret")
            .with_root(true);
        assert_eq!(config.url, "ws://localhost:8000");
        assert_eq!(config.namespace, "ns");
        assert_eq!(config.database, "db");
        assert_eq!(config.username.as_deref(), Some("root"));
        assert!(config.is_root);
    }

    #[tokio::test]
    async fn test_in_memory_connection_and_schema() {
        let handle = SurrealHandle::in_memory().await;
        assert!(handle.is_ok(), "Failed to connect: {:?}", handle.err());
        let handle = handle.unwrap();
        assert_eq!(handle.database(), "script_logs");
        handle.health_check().await.unwrap();
    }
}
