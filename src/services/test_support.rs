//! Shared helpers for service tests.

use std::time::Duration;

use tempfile::TempDir;

use crate::config::DbConfig;
use crate::db::Database;

/// Route tracing output through the test harness. Honors `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fresh on-disk database in a temp directory. Keep the `TempDir` alive
/// for the duration of the test.
pub(crate) async fn test_db() -> (Database, TempDir) {
    init_tracing();
    let dir = tempfile::tempdir().expect("failed to create temp directory");
    let path = dir.path().join("quarry.db");
    let mut config = DbConfig::new(format!("sqlite:{}", path.display()));
    config.retry_base_delay = Duration::from_millis(10);
    let db = Database::connect(config).await.expect("failed to connect");
    (db, dir)
}
