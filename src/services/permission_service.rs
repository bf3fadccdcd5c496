//! Tiered authorization resolution for shared projects and files.
//!
//! Resolution order for project access:
//! 1. authoritative role resolution (ownership + grant, compared against
//!    the required role),
//! 2. direct project ownership, which grants access regardless of the
//!    required role,
//! 3. existence of any grant row for (project, user).
//!
//! Tier 3 deliberately does not compare the grant's role against the
//! required role: a viewer-level grant satisfies an editor-level request
//! when tier 1 did not produce a grant. Whether that is an intentional
//! "fail open for shared users" policy is an open product question; the
//! behavior is reproduced here unchanged pending review.
//!
//! A store failure inside any tier is treated as "no grant from this tier"
//! and logged; resolver failures never grant access.

use sqlx::Row;
use tracing::warn;

use crate::db::{self, Database, SqlValue};
use crate::error::{QuarryError, Result};
use crate::models::{PermissionGrant, Role};

#[derive(Clone)]
pub struct PermissionService {
    db: Database,
}

impl PermissionService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Whether `user_id` may act on `project_id` at `required_role`.
    pub async fn check_user_project_permission(
        &self,
        user_id: &str,
        project_id: &str,
        required_role: Role,
    ) -> Result<bool> {
        // Tier 1: authoritative role resolution
        match self.resolve_effective_role(user_id, project_id).await {
            Ok(Some(role)) if role.satisfies(required_role) => return Ok(true),
            Ok(_) => {}
            Err(err) => {
                warn!(user_id, project_id, error = %err, "role resolution failed; falling back");
            }
        }

        // Tier 2: direct ownership of the project record
        match self.is_project_owner(user_id, project_id).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => {
                warn!(user_id, project_id, error = %err, "ownership check failed; falling back");
            }
        }

        // Tier 3: any grant row at all, role not compared (see module docs)
        match self.has_any_grant(user_id, project_id).await {
            Ok(found) => Ok(found),
            Err(err) => {
                warn!(user_id, project_id, error = %err, "grant lookup failed; denying access");
                Ok(false)
            }
        }
    }

    /// Like [`Self::check_user_project_permission`] but returns a typed
    /// denial instead of `false`, for use as a write/read gate.
    pub async fn require_project_permission(
        &self,
        user_id: &str,
        project_id: &str,
        required_role: Role,
    ) -> Result<()> {
        if self
            .check_user_project_permission(user_id, project_id, required_role)
            .await?
        {
            Ok(())
        } else {
            Err(QuarryError::AccessDenied {
                user_id: user_id.to_string(),
                resource: format!("project {project_id}"),
            })
        }
    }

    /// Whether `user_id` may read `file_id`: direct file ownership, then
    /// membership with role owner/editor in any project the file belongs to.
    pub async fn check_user_file_access(&self, user_id: &str, file_id: &str) -> Result<bool> {
        let file_row = self
            .db
            .fetch_optional(
                "SELECT owner FROM files WHERE id = ?",
                &[SqlValue::text(file_id)],
            )
            .await?;
        let Some(file_row) = file_row else {
            return Ok(false);
        };
        let owner: Option<String> = file_row.try_get("owner")?;
        if owner.as_deref() == Some(user_id) {
            return Ok(true);
        }

        let membership = self
            .db
            .fetch_optional(
                "SELECT 1 AS hit FROM project_files pf \
                 JOIN projects p ON p.id = pf.project_id \
                 LEFT JOIN project_permissions pp \
                   ON pp.project_id = pf.project_id AND pp.user_id = ?1 \
                 WHERE pf.file_id = ?2 \
                   AND (p.owner = ?1 OR pp.role IN ('owner', 'editor')) \
                 LIMIT 1",
                &[SqlValue::text(user_id), SqlValue::text(file_id)],
            )
            .await;
        match membership {
            Ok(row) => Ok(row.is_some()),
            Err(err) => {
                warn!(user_id, file_id, error = %err, "file access lookup failed; denying access");
                Ok(false)
            }
        }
    }

    /// Upsert a grant: unique per (project, user), re-sharing replaces the
    /// role and refreshes the grant timestamp.
    pub async fn share_project(
        &self,
        project_id: &str,
        user_id: &str,
        role: Role,
        granted_by: Option<&str>,
    ) -> Result<PermissionGrant> {
        let exists = self
            .db
            .fetch_optional(
                "SELECT 1 AS hit FROM projects WHERE id = ?",
                &[SqlValue::text(project_id)],
            )
            .await?;
        if exists.is_none() {
            return Err(QuarryError::ProjectNotFound(project_id.to_string()));
        }

        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .execute_write(
                "INSERT INTO project_permissions \
                 (project_id, user_id, role, granted_by, granted_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(project_id, user_id) DO UPDATE SET \
                   role = excluded.role, \
                   granted_by = excluded.granted_by, \
                   granted_at = excluded.granted_at",
                &[
                    SqlValue::text(project_id),
                    SqlValue::text(user_id),
                    SqlValue::text(role.as_str()),
                    SqlValue::opt_text(granted_by),
                    SqlValue::text(now.as_str()),
                ],
            )
            .await?;

        let row = self
            .db
            .fetch_optional(
                "SELECT * FROM project_permissions WHERE project_id = ? AND user_id = ?",
                &[SqlValue::text(project_id), SqlValue::text(user_id)],
            )
            .await?
            .ok_or_else(|| QuarryError::ProjectNotFound(project_id.to_string()))?;
        db::from_row(&row)
    }

    /// Remove a grant. Returns whether one existed.
    pub async fn revoke_project_access(&self, project_id: &str, user_id: &str) -> Result<bool> {
        let affected = self
            .db
            .execute_write(
                "DELETE FROM project_permissions WHERE project_id = ? AND user_id = ?",
                &[SqlValue::text(project_id), SqlValue::text(user_id)],
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn list_project_permissions(&self, project_id: &str) -> Result<Vec<PermissionGrant>> {
        let rows = self
            .db
            .execute(
                "SELECT * FROM project_permissions WHERE project_id = ? ORDER BY granted_at",
                &[SqlValue::text(project_id)],
            )
            .await?;
        db::from_rows(&rows)
    }

    /// Authoritative resolution: the effective role is `owner` for the
    /// project's owner, otherwise the granted role, otherwise none.
    async fn resolve_effective_role(
        &self,
        user_id: &str,
        project_id: &str,
    ) -> Result<Option<Role>> {
        let row = self
            .db
            .fetch_optional(
                "SELECT CASE WHEN p.owner = ?1 THEN 'owner' ELSE pp.role END AS role \
                 FROM projects p \
                 LEFT JOIN project_permissions pp \
                   ON pp.project_id = p.id AND pp.user_id = ?1 \
                 WHERE p.id = ?2",
                &[SqlValue::text(user_id), SqlValue::text(project_id)],
            )
            .await?;
        match row {
            Some(row) => {
                let role: Option<String> = row.try_get("role")?;
                Ok(role.and_then(|r| r.parse().ok()))
            }
            None => Ok(None),
        }
    }

    async fn is_project_owner(&self, user_id: &str, project_id: &str) -> Result<bool> {
        let row = self
            .db
            .fetch_optional(
                "SELECT 1 AS hit FROM projects WHERE id = ? AND owner = ?",
                &[SqlValue::text(project_id), SqlValue::text(user_id)],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn has_any_grant(&self, user_id: &str, project_id: &str) -> Result<bool> {
        let row = self
            .db
            .fetch_optional(
                "SELECT 1 AS hit FROM project_permissions WHERE project_id = ? AND user_id = ?",
                &[SqlValue::text(project_id), SqlValue::text(user_id)],
            )
            .await?;
        Ok(row.is_some())
    }
}
