//! Connection supplier seam
//!
//! The registry never opens or closes anything itself; it delegates to a
//! [`ConnectionSupplier`]. Production code uses [`SqliteSupplier`]; tests use
//! the counting mock in [`crate::testing`].

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::config::ConnectConfig;

/// Opens and closes the underlying shared connection
///
/// `open` may block and may fail; `close` must tolerate an already-closed
/// connection and report success.
#[async_trait]
pub trait ConnectionSupplier: Send + Sync + 'static {
    /// The connection type handed out to leases
    type Conn: Send + Sync + 'static;

    /// Open a connection using the given parameters
    async fn open(&self, config: &ConnectConfig) -> Result<Self::Conn>;

    /// Close a connection
    ///
    /// The connection arrives behind an `Arc` because released leases may
    /// still hold snapshot handles to it.
    async fn close(&self, conn: Arc<Self::Conn>) -> Result<()>;
}

/// SQLite supplier backed by a single-connection `sqlx` pool
///
/// SQLite has no login identity, so `user` and `password` from the config
/// are ignored; `driver` must be `sqlite`.
#[derive(Debug, Clone, Default)]
pub struct SqliteSupplier;

impl SqliteSupplier {
    /// Create a new SQLite supplier
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionSupplier for SqliteSupplier {
    type Conn = SqlitePool;

    async fn open(&self, config: &ConnectConfig) -> Result<SqlitePool> {
        if config.driver != "sqlite" {
            bail!("SqliteSupplier cannot open driver '{}'", config.driver);
        }

        let options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("Invalid connection URL: {}", config.url))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open shared database connection")?;

        Ok(pool)
    }

    async fn close(&self, conn: Arc<SqlitePool>) -> Result<()> {
        // Pool close is idempotent, which covers "already closed".
        conn.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_config(url: &str) -> ConnectConfig {
        ConnectConfig {
            url: url.to_string(),
            user: String::new(),
            password: String::new(),
            driver: "sqlite".to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_query_close() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("state.db").display());

        let supplier = SqliteSupplier::new();
        let pool = Arc::new(supplier.open(&sqlite_config(&url)).await.unwrap());

        sqlx::query("CREATE TABLE appointments (id INTEGER PRIMARY KEY)")
            .execute(&*pool)
            .await
            .unwrap();

        supplier.close(pool.clone()).await.unwrap();
        // Closing again is tolerated
        supplier.close(pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_wrong_driver() {
        let supplier = SqliteSupplier::new();
        let mut config = sqlite_config("sqlite::memory:");
        config.driver = "mysql".to_string();

        let err = supplier.open(&config).await.unwrap_err();
        assert!(err.to_string().contains("mysql"));
    }

    #[tokio::test]
    async fn test_open_failure_on_bad_url() {
        let supplier = SqliteSupplier::new();
        let config = sqlite_config("not-a-url://///");
        assert!(supplier.open(&config).await.is_err());
    }
}
