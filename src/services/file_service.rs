//! File record CRUD. The bytes themselves live in an external blob store;
//! this service owns only the metadata rows and their status transitions.

use crate::db::{self, Database, SqlValue};
use crate::error::{QuarryError, Result};
use crate::models::ids;
use crate::models::{CreateFile, ProcessingStatus, StoredFile, UploadStatus};

#[derive(Clone)]
pub struct FileService {
    db: Database,
}

impl FileService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create_file(&self, input: CreateFile) -> Result<StoredFile> {
        let id = ids::generate_file_id();
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .execute_write(
                "INSERT INTO files \
                 (id, name, size, mime_type, storage_path, owner, upload_status, \
                  processing_status, metadata, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                &[
                    SqlValue::text(id.as_str()),
                    SqlValue::text(input.name.as_str()),
                    SqlValue::Integer(input.size),
                    SqlValue::opt_text(input.mime_type),
                    SqlValue::opt_text(input.storage_path),
                    SqlValue::opt_text(input.owner),
                    SqlValue::text(UploadStatus::Pending.as_str()),
                    SqlValue::text(ProcessingStatus::Pending.as_str()),
                    SqlValue::opt_json(input.metadata.as_ref())?,
                    SqlValue::text(now.as_str()),
                    SqlValue::text(now.as_str()),
                ],
            )
            .await?;
        self.get_file(&id).await
    }

    pub async fn get_file(&self, id: &str) -> Result<StoredFile> {
        let row = self
            .db
            .fetch_optional("SELECT * FROM files WHERE id = ?", &[SqlValue::text(id)])
            .await?;
        match row {
            Some(row) => db::from_row(&row),
            None => Err(QuarryError::FileNotFound(id.to_string())),
        }
    }

    pub async fn list_project_files(&self, project_id: &str) -> Result<Vec<StoredFile>> {
        let rows = self
            .db
            .execute(
                "SELECT f.* FROM files f \
                 JOIN project_files pf ON pf.file_id = f.id \
                 WHERE pf.project_id = ? \
                 ORDER BY pf.added_at, f.id",
                &[SqlValue::text(project_id)],
            )
            .await?;
        db::from_rows(&rows)
    }

    /// Advance upload and/or processing status.
    pub async fn update_file_status(
        &self,
        id: &str,
        upload_status: Option<UploadStatus>,
        processing_status: Option<ProcessingStatus>,
    ) -> Result<StoredFile> {
        if upload_status.is_none() && processing_status.is_none() {
            return self.get_file(id).await;
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut sets: Vec<&str> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();
        if let Some(status) = upload_status {
            sets.push("upload_status = ?");
            params.push(SqlValue::text(status.as_str()));
        }
        if let Some(status) = processing_status {
            sets.push("processing_status = ?");
            params.push(SqlValue::text(status.as_str()));
        }
        sets.push("updated_at = ?");
        params.push(SqlValue::text(now.as_str()));
        params.push(SqlValue::text(id));

        let sql = format!("UPDATE files SET {} WHERE id = ?", sets.join(", "));
        let affected = self.db.execute_write(&sql, &params).await?;
        if affected == 0 {
            return Err(QuarryError::FileNotFound(id.to_string()));
        }
        self.get_file(id).await
    }

    /// Delete a file record. Project associations go away through the
    /// cascading constraint on `project_files`.
    pub async fn delete_file(&self, id: &str) -> Result<()> {
        let affected = self
            .db
            .execute_write("DELETE FROM files WHERE id = ?", &[SqlValue::text(id)])
            .await?;
        if affected == 0 {
            return Err(QuarryError::FileNotFound(id.to_string()));
        }
        Ok(())
    }
}
