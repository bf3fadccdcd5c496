//! Connection pool management and low-level statement execution.
//!
//! [`Database`] is the explicit handle every service is constructed with;
//! there is no module-level singleton. The pool is created lazily on first
//! use, an initialization failure is cached and returned on every later
//! call without reconstruction, and [`Database::close`] is an idempotent
//! drain suitable for a process shutdown hook.

pub mod connection;
pub mod executor;
pub mod transaction;

use std::sync::Arc;

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::FromRow;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::config::DbConfig;
use crate::error::{QuarryError, Result};

pub use executor::SqlValue;

struct DatabaseInner {
    config: DbConfig,
    /// First initialization outcome, success or failure. An `Err` here is
    /// the cached unrecoverable error: rapid successive callers get it back
    /// without a fresh construction attempt.
    init: OnceCell<std::result::Result<SqlitePool, String>>,
}

/// Handle to the backing store. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Create a handle without touching the store. The pool is built on the
    /// first operation (or an explicit [`Database::ensure_initialized`]).
    pub fn new(config: DbConfig) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                config,
                init: OnceCell::new(),
            }),
        }
    }

    /// Create a handle and eagerly initialize the pool.
    pub async fn connect(config: DbConfig) -> Result<Self> {
        let db = Self::new(config);
        db.ensure_initialized().await?;
        Ok(db)
    }

    pub fn config(&self) -> &DbConfig {
        &self.inner.config
    }

    /// Idempotent pool construction. On first call: validates configuration,
    /// builds the bounded pool, applies the schema. A failure is cached and
    /// re-returned on every subsequent call.
    pub async fn ensure_initialized(&self) -> Result<&SqlitePool> {
        let outcome = self
            .inner
            .init
            .get_or_init(|| async {
                match Self::initialize(&self.inner.config).await {
                    Ok(pool) => {
                        info!(
                            max_connections = self.inner.config.max_connections,
                            "database pool initialized"
                        );
                        Ok(pool)
                    }
                    Err(err) => {
                        error!(error = %err, "database initialization failed; caching error");
                        Err(err.to_string())
                    }
                }
            })
            .await;

        match outcome {
            Ok(pool) => Ok(pool),
            Err(message) => Err(QuarryError::Configuration(message.clone())),
        }
    }

    async fn initialize(config: &DbConfig) -> Result<SqlitePool> {
        config.validate()?;
        let pool = connection::create_pool(config).await?;
        connection::run_migrations(&pool).await?;
        Ok(pool)
    }

    /// Drain the pool. Safe to call more than once; a second call after the
    /// pool is already closed is a silent no-op.
    pub async fn close(&self) {
        if let Some(Ok(pool)) = self.inner.init.get() {
            if pool.is_closed() {
                debug!("pool already closed");
                return;
            }
            info!("draining database pool");
            pool.close().await;
        }
    }
}

/// Map one row into a model type.
pub(crate) fn from_row<T>(row: &SqliteRow) -> Result<T>
where
    T: for<'r> FromRow<'r, SqliteRow>,
{
    T::from_row(row).map_err(QuarryError::from)
}

/// Map a result set into model types.
pub(crate) fn from_rows<T>(rows: &[SqliteRow]) -> Result<Vec<T>>
where
    T: for<'r> FromRow<'r, SqliteRow>,
{
    rows.iter().map(from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(dir: &tempfile::TempDir) -> DbConfig {
        let path = dir.path().join("quarry.db");
        DbConfig::new(format!("sqlite:{}", path.display()))
    }

    #[tokio::test]
    async fn test_ensure_initialized_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(temp_config(&dir));

        db.ensure_initialized().await.unwrap();
        db.ensure_initialized().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialization_failure_is_cached() {
        // Parent directory does not exist and is never created, so the
        // connect fails both times; the second call must return the cached
        // configuration error rather than re-attempting construction.
        let db = Database::new(DbConfig::new("sqlite:/no/such/dir/at/all/quarry.db"));

        let first = db.ensure_initialized().await;
        assert!(first.is_err());

        let second = db.ensure_initialized().await;
        assert!(matches!(second, Err(QuarryError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(temp_config(&dir));
        db.ensure_initialized().await.unwrap();

        db.close().await;
        db.close().await;
    }

    #[tokio::test]
    async fn test_close_without_init_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(temp_config(&dir));
        db.close().await;
    }
}
