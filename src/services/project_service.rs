//! Project CRUD and file/template associations.

use crate::db::{self, Database, SqlValue};
use crate::error::{QuarryError, Result};
use crate::models::ids;
use crate::models::{CreateProject, Project, UpdateProject};

#[derive(Clone)]
pub struct ProjectService {
    db: Database,
}

impl ProjectService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create_project(&self, input: CreateProject) -> Result<Project> {
        let id = ids::generate_project_id();
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .execute_write(
                "INSERT INTO projects (id, name, owner, metadata, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                &[
                    SqlValue::text(id.as_str()),
                    SqlValue::text(input.name.as_str()),
                    SqlValue::opt_text(input.owner),
                    SqlValue::opt_json(input.metadata.as_ref())?,
                    SqlValue::text(now.as_str()),
                    SqlValue::text(now.as_str()),
                ],
            )
            .await?;
        self.get_project(&id).await
    }

    pub async fn get_project(&self, id: &str) -> Result<Project> {
        let row = self
            .db
            .fetch_optional("SELECT * FROM projects WHERE id = ?", &[SqlValue::text(id)])
            .await?;
        match row {
            Some(row) => db::from_row(&row),
            None => Err(QuarryError::ProjectNotFound(id.to_string())),
        }
    }

    /// Projects the user owns or has been granted access to.
    pub async fn list_projects_for_user(&self, user_id: &str) -> Result<Vec<Project>> {
        let rows = self
            .db
            .execute(
                "SELECT DISTINCT p.* FROM projects p \
                 LEFT JOIN project_permissions pp ON pp.project_id = p.id \
                 WHERE p.owner = ?1 OR pp.user_id = ?1 \
                 ORDER BY p.created_at DESC",
                &[SqlValue::text(user_id)],
            )
            .await?;
        db::from_rows(&rows)
    }

    pub async fn update_project(&self, id: &str, updates: UpdateProject) -> Result<Project> {
        let current = self.get_project(id).await?;

        let new_name = updates.name.filter(|n| *n != current.name);
        let new_metadata = updates.metadata.filter(|m| *m != current.metadata_value());
        if new_name.is_none() && new_metadata.is_none() {
            return Ok(current);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut sets: Vec<&str> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();
        if let Some(name) = &new_name {
            sets.push("name = ?");
            params.push(SqlValue::text(name.as_str()));
        }
        if let Some(metadata) = &new_metadata {
            sets.push("metadata = ?");
            params.push(SqlValue::from_json(metadata)?);
        }
        sets.push("updated_at = ?");
        params.push(SqlValue::text(now.as_str()));
        params.push(SqlValue::text(id));

        let sql = format!("UPDATE projects SET {} WHERE id = ?", sets.join(", "));
        self.db.execute_write(&sql, &params).await?;
        self.get_project(id).await
    }

    /// Delete a project and its associations atomically: file and template
    /// links and permission grants are removed before the project row, all
    /// in one transaction.
    pub async fn delete_project(&self, id: &str) -> Result<()> {
        self.get_project(id).await?;

        let project_id = id.to_string();
        self.db
            .with_transaction(move |tx| {
                Box::pin(async move {
                    for table in ["project_files", "project_templates", "project_permissions"] {
                        let sql = format!("DELETE FROM {table} WHERE project_id = ?");
                        sqlx::query(&sql)
                            .bind(&project_id)
                            .execute(&mut **tx)
                            .await?;
                    }
                    sqlx::query("DELETE FROM projects WHERE id = ?")
                        .bind(&project_id)
                        .execute(&mut **tx)
                        .await?;
                    Ok(())
                })
            })
            .await
    }

    pub async fn attach_file(&self, project_id: &str, file_id: &str) -> Result<()> {
        self.get_project(project_id).await?;
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .execute_write(
                "INSERT INTO project_files (project_id, file_id, added_at) VALUES (?, ?, ?) \
                 ON CONFLICT(project_id, file_id) DO NOTHING",
                &[
                    SqlValue::text(project_id),
                    SqlValue::text(file_id),
                    SqlValue::text(now.as_str()),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn detach_file(&self, project_id: &str, file_id: &str) -> Result<bool> {
        let affected = self
            .db
            .execute_write(
                "DELETE FROM project_files WHERE project_id = ? AND file_id = ?",
                &[SqlValue::text(project_id), SqlValue::text(file_id)],
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn attach_template(&self, project_id: &str, template_id: &str) -> Result<()> {
        self.get_project(project_id).await?;
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .execute_write(
                "INSERT INTO project_templates (project_id, template_id, added_at) VALUES (?, ?, ?) \
                 ON CONFLICT(project_id, template_id) DO NOTHING",
                &[
                    SqlValue::text(project_id),
                    SqlValue::text(template_id),
                    SqlValue::text(now.as_str()),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn detach_template(&self, project_id: &str, template_id: &str) -> Result<bool> {
        let affected = self
            .db
            .execute_write(
                "DELETE FROM project_templates WHERE project_id = ? AND template_id = ?",
                &[SqlValue::text(project_id), SqlValue::text(template_id)],
            )
            .await?;
        Ok(affected > 0)
    }
}
