//! Run creation with point-in-time snapshots, and per-field results.
//!
//! A run freezes the template definition, the project's current file set,
//! and project context into its metadata at creation. The snapshot is the
//! historical source of truth for that run: nothing here (or anywhere else
//! in the crate) rewrites it after the insert commits, so historical runs
//! render identically no matter how the live template, files, or project
//! change afterwards.

use serde_json::{Map, Value};
use sqlx::Row;

use crate::db::{self, Database, SqlValue};
use crate::error::{QuarryError, Result};
use crate::models::ids;
use crate::models::{
    CreateRun, FieldSnapshot, FileDescriptor, Run, RunResult, RunStatus, SaveResult,
    TemplateSnapshot, ACTIVE_RUN_KEY, FILE_SNAPSHOT_KEY, PROJECT_CONTEXT_KEY,
    TEMPLATE_SNAPSHOT_KEY,
};

/// Caller metadata key whose value overrides the project's own custom
/// instructions inside the snapshot's project context.
pub const CUSTOM_INSTRUCTIONS_KEY: &str = "custom_instructions";

#[derive(Clone)]
pub struct RunService {
    db: Database,
}

impl RunService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a run, freezing template/file/project state into its metadata.
    ///
    /// The run row and the template's active-run pointer are committed in
    /// one transaction; the pointer write is a targeted partial update of
    /// the template metadata document, not a full rewrite.
    pub async fn create_run(&self, input: CreateRun) -> Result<Run> {
        let template_snapshot = self.snapshot_template(&input.template_id).await?;
        let (file_snapshot, mut project_context) = match &input.project_id {
            Some(project_id) => (
                self.snapshot_project_files(project_id).await?,
                self.project_context(project_id).await?,
            ),
            None => (Vec::new(), Map::new()),
        };

        let mut run_metadata = match input.metadata {
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(QuarryError::Validation(format!(
                    "run metadata must be an object, got {}",
                    json_type_name(&other)
                )));
            }
            None => Map::new(),
        };

        if let Some(instructions) = run_metadata.get(CUSTOM_INSTRUCTIONS_KEY) {
            project_context.insert(CUSTOM_INSTRUCTIONS_KEY.to_string(), instructions.clone());
        }

        run_metadata.insert(
            TEMPLATE_SNAPSHOT_KEY.to_string(),
            serde_json::to_value(&template_snapshot)?,
        );
        run_metadata.insert(
            FILE_SNAPSHOT_KEY.to_string(),
            serde_json::to_value(&file_snapshot)?,
        );
        run_metadata.insert(
            PROJECT_CONTEXT_KEY.to_string(),
            Value::Object(project_context),
        );

        let id = ids::generate_run_id();
        let now = chrono::Utc::now().to_rfc3339();
        let metadata_text = serde_json::to_string(&Value::Object(run_metadata))?;

        let run_id = id.clone();
        let template_id = input.template_id.clone();
        let project_id = input.project_id.clone();
        let status = input.status.as_str().to_string();
        let pointer_sql = format!(
            "UPDATE templates \
             SET metadata = json_set(COALESCE(metadata, '{{}}'), '$.{ACTIVE_RUN_KEY}', ?), \
                 updated_at = ? \
             WHERE id = ?"
        );
        self.db
            .with_transaction(move |tx| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO runs \
                         (id, template_id, project_id, status, metadata, created_at, updated_at) \
                         VALUES (?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&run_id)
                    .bind(&template_id)
                    .bind(&project_id)
                    .bind(&status)
                    .bind(&metadata_text)
                    .bind(&now)
                    .bind(&now)
                    .execute(&mut **tx)
                    .await?;

                    sqlx::query(&pointer_sql)
                        .bind(&run_id)
                        .bind(&now)
                        .bind(&template_id)
                        .execute(&mut **tx)
                        .await?;

                    Ok(())
                })
            })
            .await?;

        self.get_run(&id).await
    }

    pub async fn get_run(&self, id: &str) -> Result<Run> {
        let row = self
            .db
            .fetch_optional("SELECT * FROM runs WHERE id = ?", &[SqlValue::text(id)])
            .await?;
        match row {
            Some(row) => db::from_row(&row),
            None => Err(QuarryError::RunNotFound(id.to_string())),
        }
    }

    /// Runs for a template, newest first. The first row is the "live" run;
    /// the rest are read-only historical views.
    pub async fn list_runs(
        &self,
        template_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<Run>> {
        let rows = match project_id {
            Some(project_id) => {
                self.db
                    .execute(
                        "SELECT * FROM runs WHERE template_id = ? AND project_id = ? \
                         ORDER BY created_at DESC, id DESC",
                        &[SqlValue::text(template_id), SqlValue::text(project_id)],
                    )
                    .await?
            }
            None => {
                self.db
                    .execute(
                        "SELECT * FROM runs WHERE template_id = ? \
                         ORDER BY created_at DESC, id DESC",
                        &[SqlValue::text(template_id)],
                    )
                    .await?
            }
        };
        db::from_rows(&rows)
    }

    /// The most recently created run for (template, project), if any.
    pub async fn latest_run(
        &self,
        template_id: &str,
        project_id: Option<&str>,
    ) -> Result<Option<Run>> {
        Ok(self.list_runs(template_id, project_id).await?.into_iter().next())
    }

    pub async fn update_run_status(&self, id: &str, status: RunStatus) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let affected = self
            .db
            .execute_write(
                "UPDATE runs SET status = ?, updated_at = ? WHERE id = ?",
                &[
                    SqlValue::text(status.as_str()),
                    SqlValue::text(now.as_str()),
                    SqlValue::text(id),
                ],
            )
            .await?;
        if affected == 0 {
            return Err(QuarryError::RunNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete a run. Its results go away through the cascading constraint;
    /// no separate delete statement is issued for them.
    pub async fn delete_run(&self, id: &str) -> Result<()> {
        let affected = self
            .db
            .execute_write("DELETE FROM runs WHERE id = ?", &[SqlValue::text(id)])
            .await?;
        if affected == 0 {
            return Err(QuarryError::RunNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Upsert the result for one (run, field) pair in a single atomic
    /// statement: latest result wins, no duplicate rows under concurrency.
    pub async fn save_result(&self, input: SaveResult) -> Result<RunResult> {
        self.get_run(&input.run_id).await?;

        let id = ids::generate_result_id();
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .execute_write(
                "INSERT INTO run_results \
                 (id, run_id, field_id, value, metadata, status, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(run_id, field_id) DO UPDATE SET \
                   value = excluded.value, \
                   metadata = COALESCE(excluded.metadata, run_results.metadata), \
                   status = excluded.status, \
                   updated_at = excluded.updated_at",
                &[
                    SqlValue::text(id.as_str()),
                    SqlValue::text(input.run_id.as_str()),
                    SqlValue::text(input.field_id.as_str()),
                    SqlValue::text(serde_json::to_string(&input.value)?),
                    SqlValue::opt_json(input.metadata.as_ref())?,
                    SqlValue::text(input.status.as_str()),
                    SqlValue::text(now.as_str()),
                    SqlValue::text(now.as_str()),
                ],
            )
            .await?;

        self.get_result(&input.run_id, &input.field_id)
            .await?
            .ok_or(QuarryError::ResultNotFound {
                run_id: input.run_id,
                field_id: input.field_id,
            })
    }

    /// Update a result's display metadata without touching its value.
    pub async fn update_result_metadata(
        &self,
        run_id: &str,
        field_id: &str,
        metadata: &Value,
    ) -> Result<RunResult> {
        let now = chrono::Utc::now().to_rfc3339();
        let affected = self
            .db
            .execute_write(
                "UPDATE run_results SET metadata = ?, updated_at = ? \
                 WHERE run_id = ? AND field_id = ?",
                &[
                    SqlValue::from_json(metadata)?,
                    SqlValue::text(now.as_str()),
                    SqlValue::text(run_id),
                    SqlValue::text(field_id),
                ],
            )
            .await?;
        if affected == 0 {
            return Err(QuarryError::ResultNotFound {
                run_id: run_id.to_string(),
                field_id: field_id.to_string(),
            });
        }
        self.get_result(run_id, field_id)
            .await?
            .ok_or(QuarryError::ResultNotFound {
                run_id: run_id.to_string(),
                field_id: field_id.to_string(),
            })
    }

    pub async fn get_result(&self, run_id: &str, field_id: &str) -> Result<Option<RunResult>> {
        let row = self
            .db
            .fetch_optional(
                "SELECT * FROM run_results WHERE run_id = ? AND field_id = ?",
                &[SqlValue::text(run_id), SqlValue::text(field_id)],
            )
            .await?;
        row.as_ref().map(db::from_row).transpose()
    }

    pub async fn get_results(&self, run_id: &str) -> Result<Vec<RunResult>> {
        let rows = self
            .db
            .execute(
                "SELECT * FROM run_results WHERE run_id = ? ORDER BY created_at, id",
                &[SqlValue::text(run_id)],
            )
            .await?;
        db::from_rows(&rows)
    }

    async fn snapshot_template(&self, template_id: &str) -> Result<TemplateSnapshot> {
        let row = self
            .db
            .fetch_optional(
                "SELECT * FROM templates WHERE id = ?",
                &[SqlValue::text(template_id)],
            )
            .await?
            .ok_or_else(|| QuarryError::TemplateNotFound(template_id.to_string()))?;
        let template: crate::models::Template = db::from_row(&row)?;

        let field_rows = self
            .db
            .execute(
                "SELECT * FROM template_fields WHERE template_id = ? \
                 ORDER BY sort_order, created_at",
                &[SqlValue::text(template_id)],
            )
            .await?;
        let fields: Vec<crate::models::TemplateField> = db::from_rows(&field_rows)?;

        let version_rows = self
            .db
            .execute(
                "SELECT COALESCE(MAX(version_number), 0) AS current \
                 FROM template_versions WHERE template_id = ?",
                &[SqlValue::text(template_id)],
            )
            .await?;
        let version: i64 = match version_rows.first() {
            Some(row) => row.try_get("current")?,
            None => 0,
        };

        Ok(TemplateSnapshot {
            version,
            name: template.name.clone(),
            metadata: template.metadata_value(),
            fields: fields
                .into_iter()
                .map(|field| {
                    let metadata = field.metadata_value();
                    FieldSnapshot {
                        id: field.id,
                        name: field.name,
                        description: field.description,
                        sort_order: field.sort_order,
                        metadata,
                    }
                })
                .collect(),
        })
    }

    /// Resolve the files currently associated with the project, reduced to
    /// compact descriptors.
    async fn snapshot_project_files(&self, project_id: &str) -> Result<Vec<FileDescriptor>> {
        let rows = self
            .db
            .execute(
                "SELECT f.id, f.name, f.size, f.mime_type, f.upload_status, f.processing_status \
                 FROM files f \
                 JOIN project_files pf ON pf.file_id = f.id \
                 WHERE pf.project_id = ? \
                 ORDER BY pf.added_at, f.id",
                &[SqlValue::text(project_id)],
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(FileDescriptor {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    size: row.try_get("size")?,
                    mime_type: row.try_get("mime_type")?,
                    upload_status: row.try_get("upload_status")?,
                    processing_status: row.try_get("processing_status")?,
                })
            })
            .collect()
    }

    async fn project_context(&self, project_id: &str) -> Result<Map<String, Value>> {
        let row = self
            .db
            .fetch_optional(
                "SELECT * FROM projects WHERE id = ?",
                &[SqlValue::text(project_id)],
            )
            .await?
            .ok_or_else(|| QuarryError::ProjectNotFound(project_id.to_string()))?;
        let project: crate::models::Project = db::from_row(&row)?;

        let mut context = match project.metadata_value() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        context.insert("project_id".to_string(), Value::String(project.id));
        context.insert("project_name".to_string(), Value::String(project.name));
        Ok(context)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
