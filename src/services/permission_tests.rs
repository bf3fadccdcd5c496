//! Tests for the tiered authorization resolver.

use serde_json::json;

use crate::db::Database;
use crate::error::QuarryError;
use crate::models::{CreateFile, CreateProject, Role};
use crate::services::file_service::FileService;
use crate::services::permission_service::PermissionService;
use crate::services::project_service::ProjectService;
use crate::services::test_support::test_db;

struct Fixture {
    db: Database,
    projects: ProjectService,
    files: FileService,
    permissions: PermissionService,
    _dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let (db, dir) = test_db().await;
    Fixture {
        projects: ProjectService::new(db.clone()),
        files: FileService::new(db.clone()),
        permissions: PermissionService::new(db.clone()),
        db,
        _dir: dir,
    }
}

async fn project_owned_by(fx: &Fixture, owner: &str) -> String {
    fx.projects
        .create_project(CreateProject {
            name: "P".to_string(),
            owner: Some(owner.to_string()),
            metadata: Some(json!({})),
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_owner_is_granted_without_any_grant_row() {
    let fx = fixture().await;
    let project_id = project_owned_by(&fx, "alice").await;

    assert!(fx
        .permissions
        .check_user_project_permission("alice", &project_id, Role::Owner)
        .await
        .unwrap());
    assert!(fx
        .permissions
        .check_user_project_permission("alice", &project_id, Role::Editor)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_stranger_is_denied() {
    let fx = fixture().await;
    let project_id = project_owned_by(&fx, "alice").await;

    assert!(!fx
        .permissions
        .check_user_project_permission("mallory", &project_id, Role::Editor)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_missing_project_is_denied_not_an_error() {
    let fx = fixture().await;
    assert!(!fx
        .permissions
        .check_user_project_permission("alice", "proj-missing", Role::Editor)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_editor_grant_satisfies_editor() {
    let fx = fixture().await;
    let project_id = project_owned_by(&fx, "alice").await;
    fx.permissions
        .share_project(&project_id, "bob", Role::Editor, Some("alice"))
        .await
        .unwrap();

    assert!(fx
        .permissions
        .check_user_project_permission("bob", &project_id, Role::Editor)
        .await
        .unwrap());
}

/// The tier-3 fallback grants access on the mere existence of a grant row,
/// without comparing the grant's role to the required one. A viewer-level
/// grant therefore satisfies an editor-level request. This pins the current
/// behavior pending product review; see the module docs.
#[tokio::test]
async fn test_any_grant_row_satisfies_higher_required_role() {
    let fx = fixture().await;
    let project_id = project_owned_by(&fx, "alice").await;
    fx.permissions
        .share_project(&project_id, "carol", Role::Viewer, Some("alice"))
        .await
        .unwrap();

    assert!(fx
        .permissions
        .check_user_project_permission("carol", &project_id, Role::Editor)
        .await
        .unwrap());
}

/// When the tier-1 role resolution fails at the store level, the ownership
/// fallback must still grant the direct owner, and a failure must never
/// turn into a grant for anyone else.
#[tokio::test]
async fn test_owner_still_granted_when_role_resolution_fails() {
    let fx = fixture().await;
    let project_id = project_owned_by(&fx, "alice").await;

    // Breaks the tier-1 join (and the tier-3 lookup) for every later check
    fx.db
        .execute_write("DROP TABLE project_permissions", &[])
        .await
        .unwrap();

    assert!(fx
        .permissions
        .check_user_project_permission("alice", &project_id, Role::Owner)
        .await
        .unwrap());
    assert!(!fx
        .permissions
        .check_user_project_permission("mallory", &project_id, Role::Editor)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_reshare_upserts_single_grant_row() {
    let fx = fixture().await;
    let project_id = project_owned_by(&fx, "alice").await;

    fx.permissions
        .share_project(&project_id, "bob", Role::Viewer, Some("alice"))
        .await
        .unwrap();
    let grant = fx
        .permissions
        .share_project(&project_id, "bob", Role::Editor, Some("alice"))
        .await
        .unwrap();
    assert_eq!(grant.role_enum(), Role::Editor);

    let grants = fx
        .permissions
        .list_project_permissions(&project_id)
        .await
        .unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].role, "editor");
}

#[tokio::test]
async fn test_revoke_removes_access() {
    let fx = fixture().await;
    let project_id = project_owned_by(&fx, "alice").await;
    fx.permissions
        .share_project(&project_id, "bob", Role::Editor, Some("alice"))
        .await
        .unwrap();

    assert!(fx
        .permissions
        .revoke_project_access(&project_id, "bob")
        .await
        .unwrap());
    assert!(!fx
        .permissions
        .check_user_project_permission("bob", &project_id, Role::Editor)
        .await
        .unwrap());
    // Revoking again reports nothing removed
    assert!(!fx
        .permissions
        .revoke_project_access(&project_id, "bob")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_require_permission_returns_typed_denial() {
    let fx = fixture().await;
    let project_id = project_owned_by(&fx, "alice").await;

    let denied = fx
        .permissions
        .require_project_permission("mallory", &project_id, Role::Editor)
        .await;
    assert!(matches!(denied, Err(QuarryError::AccessDenied { .. })));

    fx.permissions
        .require_project_permission("alice", &project_id, Role::Owner)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_file_access_via_direct_ownership() {
    let fx = fixture().await;
    let file = fx
        .files
        .create_file(CreateFile {
            name: "doc.pdf".to_string(),
            size: 1,
            owner: Some("alice".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(fx
        .permissions
        .check_user_file_access("alice", &file.id)
        .await
        .unwrap());
    assert!(!fx
        .permissions
        .check_user_file_access("bob", &file.id)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_file_access_via_project_membership() {
    let fx = fixture().await;
    let project_id = project_owned_by(&fx, "alice").await;
    let file = fx
        .files
        .create_file(CreateFile {
            name: "doc.pdf".to_string(),
            size: 1,
            owner: Some("alice".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    fx.projects.attach_file(&project_id, &file.id).await.unwrap();

    fx.permissions
        .share_project(&project_id, "bob", Role::Editor, Some("alice"))
        .await
        .unwrap();
    fx.permissions
        .share_project(&project_id, "carol", Role::Viewer, Some("alice"))
        .await
        .unwrap();

    // Editors reach project files; viewer-level membership does not
    assert!(fx
        .permissions
        .check_user_file_access("bob", &file.id)
        .await
        .unwrap());
    assert!(!fx
        .permissions
        .check_user_file_access("carol", &file.id)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_missing_file_access_is_denied() {
    let fx = fixture().await;
    assert!(!fx
        .permissions
        .check_user_file_access("alice", "file-missing")
        .await
        .unwrap());
}
