//! Multi-statement transactions on one exclusively held connection.

use futures::future::BoxFuture;
use sqlx::{Sqlite, Transaction};
use tracing::warn;

use super::Database;
use crate::error::Result;

impl Database {
    /// Run `f` inside a transaction: `BEGIN` on one pooled connection,
    /// `COMMIT` when the closure returns `Ok`, `ROLLBACK` on `Err`. The
    /// connection is released on every path.
    ///
    /// ```ignore
    /// db.with_transaction(|tx| {
    ///     Box::pin(async move {
    ///         sqlx::query("DELETE FROM project_files WHERE project_id = ?")
    ///             .bind(&project_id)
    ///             .execute(&mut **tx)
    ///             .await?;
    ///         Ok(())
    ///     })
    /// })
    /// .await?;
    /// ```
    pub async fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction<'static, Sqlite>) -> BoxFuture<'t, Result<T>>,
    {
        let pool = self.ensure_initialized().await?;
        let mut tx = pool.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::error::QuarryError;

    async fn test_db(dir: &tempfile::TempDir) -> Database {
        let path = dir.path().join("quarry.db");
        Database::connect(DbConfig::new(format!("sqlite:{}", path.display())))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_commit_persists_all_statements() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db(&dir).await;

        db.with_transaction(|tx| {
            Box::pin(async move {
                for id in ["a", "b"] {
                    sqlx::query(
                        "INSERT INTO projects (id, name, created_at, updated_at) VALUES (?, ?, '', '')",
                    )
                    .bind(id)
                    .bind("p")
                    .execute(&mut **tx)
                    .await?;
                }
                Ok(())
            })
        })
        .await
        .unwrap();

        let rows = db.execute("SELECT id FROM projects", &[]).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_error_rolls_back_every_statement() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db(&dir).await;

        let result: Result<()> = db
            .with_transaction(|tx| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO projects (id, name, created_at, updated_at) VALUES ('x', 'p', '', '')",
                    )
                    .execute(&mut **tx)
                    .await?;
                    Err(QuarryError::Validation("forced failure".to_string()))
                })
            })
            .await;

        assert!(result.is_err());
        let rows = db.execute("SELECT id FROM projects", &[]).await.unwrap();
        assert!(rows.is_empty());
    }
}
