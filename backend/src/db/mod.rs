//! Database connection and the SQLite driver

pub mod schema_sync;
pub mod sqlite;
pub mod sqlite_helpers;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{info, warn};

use crate::config::Config;
use crate::orm::{Client, Driver, Registry};

pub use schema_sync::SchemaSyncResult;
pub use sqlite::{SqliteDriver, SqliteTx};

/// Database wrapper providing connection pool access
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn options(url: &str) -> Result<SqliteConnectOptions> {
        Ok(SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL {url:?}"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal))
    }

    /// Create a new database connection pool
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(Self::options(url)?)
            .await
            .with_context(|| format!("Failed to connect to {url}"))?;

        info!(url, max_connections, "Database connected");
        Ok(Self { pool })
    }

    /// Create a new database connection pool with retry logic
    ///
    /// Retries every `retry_interval` until connected or `timeout` elapses.
    pub async fn connect_with_retry(
        url: &str,
        max_connections: u32,
        retry_interval: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match Self::connect(url, max_connections).await {
                Ok(db) => return Ok(db),
                Err(e) if tokio::time::Instant::now() + retry_interval < deadline => {
                    warn!(
                        error = %e,
                        retry_secs = retry_interval.as_secs_f64(),
                        "Database connection failed, retrying"
                    );
                    tokio::time::sleep(retry_interval).await;
                }
                Err(e) => {
                    bail!("Database connection failed after {:?}: {:#}", timeout, e)
                }
            }
        }
    }

    /// Connect using the configured URL, pool size and timeout
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::connect_with_retry(
            &config.database_url,
            config.max_connections,
            Duration::from_secs(1),
            config.connect_timeout,
        )
        .await
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// A driver over this pool
    pub fn driver(&self) -> Arc<dyn Driver> {
        Arc::new(SqliteDriver::new(self.pool.clone()))
    }

    /// A client over this pool
    pub fn client(&self) -> Client {
        Client::new(self.driver())
    }

    /// Create missing tables and columns for every entity in `registry`
    pub async fn sync_schema(&self, registry: &Registry) -> Result<SchemaSyncResult> {
        registry
            .validate()
            .map_err(anyhow::Error::msg)
            .context("Invalid entity registry")?;
        let result = schema_sync::sync_registry(&self.pool, registry).await;
        info!(
            tables_created = result.tables_created.len(),
            columns_added = result.columns_added.len(),
            errors = result.errors.len(),
            "Schema sync finished"
        );
        if !result.is_ok() {
            bail!("Schema sync failed: {}", result.errors.join("; "));
        }
        Ok(result)
    }
}
