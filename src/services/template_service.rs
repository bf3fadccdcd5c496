//! Template CRUD and the change-versioning subsystem.
//!
//! Every meaningful mutation of a template or its fields appends exactly one
//! immutable [`TemplateVersion`] row describing what changed. Change
//! detection compares only the attributes the caller intends to change,
//! using structural equality on the decoded metadata document, so a no-op
//! update issues no write and records no version. Version writes are
//! best-effort: a failure is logged and swallowed and never rolls back the
//! primary mutation.

use serde_json::Value;
use sqlx::Row;
use tracing::warn;

use crate::db::{self, Database, SqlValue};
use crate::error::{QuarryError, Result};
use crate::models::ids;
use crate::models::{
    ChangeType, CreateField, CreateTemplate, FieldSnapshot, Template, TemplateField,
    TemplateSnapshot, TemplateVersion, UpdateField, UpdateTemplate,
};

#[derive(Clone)]
pub struct TemplateService {
    db: Database,
}

impl TemplateService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create_template(&self, input: CreateTemplate) -> Result<Template> {
        let id = ids::generate_template_id();
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .execute_write(
                "INSERT INTO templates (id, name, owner, metadata, created_at, updated_at) \
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

        self.record_version(
            &id,
            ChangeType::Created,
            &format!("Created template '{}'", input.name),
        )
        .await;

        self.get_template(&id).await
    }

    pub async fn get_template(&self, id: &str) -> Result<Template> {
        let row = self
            .db
            .fetch_optional("SELECT * FROM templates WHERE id = ?", &[SqlValue::text(id)])
            .await?;
        match row {
            Some(row) => db::from_row(&row),
            None => Err(QuarryError::TemplateNotFound(id.to_string())),
        }
    }

    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        let rows = self
            .db
            .execute("SELECT * FROM templates ORDER BY created_at DESC", &[])
            .await?;
        db::from_rows(&rows)
    }

    pub async fn delete_template(&self, id: &str) -> Result<()> {
        let affected = self
            .db
            .execute_write("DELETE FROM templates WHERE id = ?", &[SqlValue::text(id)])
            .await?;
        if affected == 0 {
            return Err(QuarryError::TemplateNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Apply the caller's intended changes, writing only the attributes that
    /// actually differ from stored state. A no-op update returns the current
    /// row without issuing any write or version record.
    ///
    /// Change description priority: a name change is reported as `renamed`;
    /// otherwise a metadata change is `metadata_updated`, with a dedicated
    /// message when only the description sub-field differs.
    pub async fn update_template(&self, id: &str, updates: UpdateTemplate) -> Result<Template> {
        let current = self.get_template(id).await?;
        let current_meta = current.metadata_value();

        let new_name = updates.name.filter(|n| *n != current.name);
        let new_metadata = updates.metadata.filter(|m| *m != current_meta);

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

        let sql = format!("UPDATE templates SET {} WHERE id = ?", sets.join(", "));
        self.db.execute_write(&sql, &params).await?;

        let (change_type, description) = if let Some(name) = &new_name {
            (
                ChangeType::Renamed,
                format!("Renamed from '{}' to '{}'", current.name, name),
            )
        } else if new_metadata
            .as_ref()
            .is_some_and(|m| only_description_differs(&current_meta, m))
        {
            (ChangeType::MetadataUpdated, "Description updated".to_string())
        } else {
            (
                ChangeType::MetadataUpdated,
                "Template settings updated".to_string(),
            )
        };
        self.record_version(id, change_type, &description).await;

        self.get_template(id).await
    }

    pub async fn list_fields(&self, template_id: &str) -> Result<Vec<TemplateField>> {
        let rows = self
            .db
            .execute(
                "SELECT * FROM template_fields WHERE template_id = ? \
                 ORDER BY sort_order, created_at",
                &[SqlValue::text(template_id)],
            )
            .await?;
        db::from_rows(&rows)
    }

    pub async fn get_field(&self, field_id: &str) -> Result<TemplateField> {
        let row = self
            .db
            .fetch_optional(
                "SELECT * FROM template_fields WHERE id = ?",
                &[SqlValue::text(field_id)],
            )
            .await?;
        match row {
            Some(row) => db::from_row(&row),
            None => Err(QuarryError::FieldNotFound(field_id.to_string())),
        }
    }

    pub async fn create_field(&self, template_id: &str, input: CreateField) -> Result<TemplateField> {
        self.get_template(template_id).await?;

        let sort_order = match input.sort_order {
            Some(order) => order,
            None => self.next_sort_order(template_id).await?,
        };

        let id = ids::generate_field_id();
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .execute_write(
                "INSERT INTO template_fields \
                 (id, template_id, name, description, sort_order, metadata, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                &[
                    SqlValue::text(id.as_str()),
                    SqlValue::text(template_id),
                    SqlValue::text(input.name.as_str()),
                    SqlValue::opt_text(input.description),
                    SqlValue::Integer(sort_order),
                    SqlValue::opt_json(input.metadata.as_ref())?,
                    SqlValue::text(now.as_str()),
                    SqlValue::text(now.as_str()),
                ],
            )
            .await?;

        self.record_version(
            template_id,
            ChangeType::FieldAdded,
            &format!("Added field '{}'", input.name),
        )
        .await;

        self.get_field(&id).await
    }

    /// Apply field changes with per-attribute actual-change detection,
    /// accumulating change fragments into one combined description. A
    /// sort_order-only change is recorded as `reordered`, not `field_updated`.
    pub async fn update_field(
        &self,
        template_id: &str,
        field_id: &str,
        updates: UpdateField,
    ) -> Result<TemplateField> {
        let field = self.get_field(field_id).await?;
        if field.template_id != template_id {
            return Err(QuarryError::FieldNotFound(field_id.to_string()));
        }

        let new_name = updates.name.filter(|n| *n != field.name);
        let new_description = updates
            .description
            .filter(|d| field.description.as_deref() != Some(d.as_str()));
        let new_sort = updates.sort_order.filter(|s| *s != field.sort_order);
        let new_metadata = updates.metadata.filter(|m| *m != field.metadata_value());

        if new_name.is_none()
            && new_description.is_none()
            && new_sort.is_none()
            && new_metadata.is_none()
        {
            return Ok(field);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut sets: Vec<&str> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();
        let mut fragments: Vec<String> = Vec::new();

        if let Some(name) = &new_name {
            sets.push("name = ?");
            params.push(SqlValue::text(name.as_str()));
            fragments.push(format!("renamed to '{name}'"));
        }
        if let Some(description) = &new_description {
            sets.push("description = ?");
            params.push(SqlValue::text(description.as_str()));
            fragments.push("description updated".to_string());
        }
        if let Some(metadata) = &new_metadata {
            sets.push("metadata = ?");
            params.push(SqlValue::from_json(metadata)?);
            fragments.push("settings updated".to_string());
        }
        if let Some(order) = new_sort {
            sets.push("sort_order = ?");
            params.push(SqlValue::Integer(order));
            fragments.push("reordered".to_string());
        }
        sets.push("updated_at = ?");
        params.push(SqlValue::text(now.as_str()));
        params.push(SqlValue::text(field_id));

        let sql = format!(
            "UPDATE template_fields SET {} WHERE id = ?",
            sets.join(", ")
        );
        self.db.execute_write(&sql, &params).await?;

        let reorder_only = new_sort.is_some()
            && new_name.is_none()
            && new_description.is_none()
            && new_metadata.is_none();
        let (change_type, description) = if reorder_only {
            (
                ChangeType::Reordered,
                format!("Field '{}' reordered", field.name),
            )
        } else {
            (
                ChangeType::FieldUpdated,
                format!("Field '{}' {}", field.name, fragments.join(", ")),
            )
        };
        self.record_version(template_id, change_type, &description).await;

        self.get_field(field_id).await
    }

    pub async fn delete_field(&self, template_id: &str, field_id: &str) -> Result<()> {
        let field = self.get_field(field_id).await?;
        if field.template_id != template_id {
            return Err(QuarryError::FieldNotFound(field_id.to_string()));
        }

        self.db
            .execute_write(
                "DELETE FROM template_fields WHERE id = ?",
                &[SqlValue::text(field_id)],
            )
            .await?;

        self.record_version(
            template_id,
            ChangeType::FieldRemoved,
            &format!("Removed field '{}'", field.name),
        )
        .await;

        Ok(())
    }

    /// All version records for a template, newest first.
    pub async fn get_template_history(&self, template_id: &str) -> Result<Vec<TemplateVersion>> {
        self.get_template(template_id).await?;
        let rows = self
            .db
            .execute(
                "SELECT * FROM template_versions WHERE template_id = ? \
                 ORDER BY version_number DESC",
                &[SqlValue::text(template_id)],
            )
            .await?;
        db::from_rows(&rows)
    }

    pub async fn get_template_version(
        &self,
        template_id: &str,
        version: i64,
    ) -> Result<TemplateVersion> {
        let row = self
            .db
            .fetch_optional(
                "SELECT * FROM template_versions WHERE template_id = ? AND version_number = ?",
                &[SqlValue::text(template_id), SqlValue::Integer(version)],
            )
            .await?;
        match row {
            Some(row) => db::from_row(&row),
            None => Err(QuarryError::VersionNotFound {
                template_id: template_id.to_string(),
                version,
            }),
        }
    }

    /// Re-apply the state captured in a version record: template name and
    /// metadata plus the full field set, atomically. Appends a `restored`
    /// version describing the rollback.
    pub async fn restore_template_version(
        &self,
        template_id: &str,
        version: i64,
    ) -> Result<Template> {
        let record = self.get_template_version(template_id, version).await?;
        let snapshot: TemplateSnapshot = record
            .snapshot
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .ok_or(QuarryError::VersionNotFound {
                template_id: template_id.to_string(),
                version,
            })?;

        let tid = template_id.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let metadata_text = json_text(&snapshot.metadata)?;
                    sqlx::query(
                        "UPDATE templates SET name = ?, metadata = ?, updated_at = ? WHERE id = ?",
                    )
                    .bind(&snapshot.name)
                    .bind(&metadata_text)
                    .bind(&now)
                    .bind(&tid)
                    .execute(&mut **tx)
                    .await?;

                    sqlx::query("DELETE FROM template_fields WHERE template_id = ?")
                        .bind(&tid)
                        .execute(&mut **tx)
                        .await?;

                    for field in &snapshot.fields {
                        let field_metadata = json_text(&field.metadata)?;
                        sqlx::query(
                            "INSERT INTO template_fields \
                             (id, template_id, name, description, sort_order, metadata, created_at, updated_at) \
                             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                        )
                        .bind(&field.id)
                        .bind(&tid)
                        .bind(&field.name)
                        .bind(&field.description)
                        .bind(field.sort_order)
                        .bind(&field_metadata)
                        .bind(&now)
                        .bind(&now)
                        .execute(&mut **tx)
                        .await?;
                    }
                    Ok(())
                })
            })
            .await?;

        self.record_version(
            template_id,
            ChangeType::Restored,
            &format!("Restored to version {version}"),
        )
        .await;

        self.get_template(template_id).await
    }

    /// Highest recorded version number, 0 when the template has none.
    pub async fn current_version_number(&self, template_id: &str) -> Result<i64> {
        let rows = self
            .db
            .execute(
                "SELECT COALESCE(MAX(version_number), 0) AS current \
                 FROM template_versions WHERE template_id = ?",
                &[SqlValue::text(template_id)],
            )
            .await?;
        match rows.first() {
            Some(row) => Ok(row.try_get("current")?),
            None => Ok(0),
        }
    }

    /// Capture the template's current state for a version record.
    pub(crate) async fn build_snapshot(
        &self,
        template_id: &str,
        version: i64,
    ) -> Result<TemplateSnapshot> {
        let template = self.get_template(template_id).await?;
        let fields = self.list_fields(template_id).await?;
        let metadata = template.metadata_value();
        Ok(TemplateSnapshot {
            version,
            name: template.name,
            metadata,
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

    /// Best-effort version append. Must never block the primary write:
    /// failures are logged and swallowed.
    async fn record_version(&self, template_id: &str, change_type: ChangeType, description: &str) {
        if let Err(err) = self
            .try_record_version(template_id, change_type, description)
            .await
        {
            warn!(template_id, error = %err, "failed to record template version");
        }
    }

    async fn try_record_version(
        &self,
        template_id: &str,
        change_type: ChangeType,
        description: &str,
    ) -> Result<()> {
        let next = self.current_version_number(template_id).await? + 1;
        let snapshot = self.build_snapshot(template_id, next).await?;
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .execute_write(
                "INSERT INTO template_versions \
                 (template_id, version_number, change_type, change_description, snapshot, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                &[
                    SqlValue::text(template_id),
                    SqlValue::Integer(next),
                    SqlValue::text(change_type.as_str()),
                    SqlValue::text(description),
                    SqlValue::text(serde_json::to_string(&snapshot)?),
                    SqlValue::text(now.as_str()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn next_sort_order(&self, template_id: &str) -> Result<i64> {
        let rows = self
            .db
            .execute(
                "SELECT COALESCE(MAX(sort_order), -1) + 1 AS next \
                 FROM template_fields WHERE template_id = ?",
                &[SqlValue::text(template_id)],
            )
            .await?;
        match rows.first() {
            Some(row) => Ok(row.try_get("next")?),
            None => Ok(0),
        }
    }
}

fn json_text(value: &Value) -> Result<Option<String>> {
    if value.is_null() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(value)?))
    }
}

/// True when both documents are objects whose only differing key is
/// `description`. Structural comparison, independent of key order.
pub(crate) fn only_description_differs(old: &Value, new: &Value) -> bool {
    let (Some(old), Some(new)) = (old.as_object(), new.as_object()) else {
        return false;
    };
    let mut description_changed = false;
    let keys: std::collections::BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    for key in keys {
        if old.get(key) != new.get(key) {
            if key == "description" {
                description_changed = true;
            } else {
                return false;
            }
        }
    }
    description_changed
}
