//! End-to-end tests across the persistence layer: pool lifecycle, retry
//! classification behavior, and a full template/project/run workflow.

use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::TempDir;

use quarry::models::{
    CreateField, CreateFile, CreateProject, CreateRun, CreateTemplate, Role, RunStatus,
    SaveResult, UploadStatus,
};
use quarry::services::{
    FileService, PermissionService, ProjectService, RunService, TemplateService,
};
use quarry::{Database, DbConfig, QuarryError};

fn config_for(dir: &TempDir) -> DbConfig {
    let path = dir.path().join("quarry.db");
    let mut config = DbConfig::new(format!("sqlite:{}", path.display()));
    config.retry_base_delay = Duration::from_millis(20);
    config
}

#[tokio::test]
async fn test_full_workflow() {
    let dir = TempDir::new().expect("temp dir");
    let db = Database::connect(config_for(&dir)).await.expect("connect");

    let templates = TemplateService::new(db.clone());
    let projects = ProjectService::new(db.clone());
    let files = FileService::new(db.clone());
    let permissions = PermissionService::new(db.clone());
    let runs = RunService::new(db.clone());

    // Owner builds a template with fields
    let template = templates
        .create_template(CreateTemplate {
            name: "Contract Review".to_string(),
            owner: Some("alice".to_string()),
            metadata: Some(json!({"description": "standard review"})),
        })
        .await
        .unwrap();
    let field = templates
        .create_field(
            &template.id,
            CreateField {
                name: "Termination".to_string(),
                description: Some("termination clauses".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Project with one uploaded file, shared with an editor
    let project = projects
        .create_project(CreateProject {
            name: "Acme Deal".to_string(),
            owner: Some("alice".to_string()),
            metadata: Some(json!({"region": "us"})),
        })
        .await
        .unwrap();
    let file = files
        .create_file(CreateFile {
            name: "msa.pdf".to_string(),
            size: 2048,
            mime_type: Some("application/pdf".to_string()),
            owner: Some("alice".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    files
        .update_file_status(&file.id, Some(UploadStatus::Uploaded), None)
        .await
        .unwrap();
    projects.attach_file(&project.id, &file.id).await.unwrap();
    projects
        .attach_template(&project.id, &template.id)
        .await
        .unwrap();
    permissions
        .share_project(&project.id, "bob", Role::Editor, Some("alice"))
        .await
        .unwrap();
    assert!(permissions
        .check_user_project_permission("bob", &project.id, Role::Editor)
        .await
        .unwrap());
    assert!(permissions
        .check_user_file_access("bob", &file.id)
        .await
        .unwrap());

    // Execute: run freezes state, results are recorded per field
    let run = runs
        .create_run(CreateRun {
            template_id: template.id.clone(),
            project_id: Some(project.id.clone()),
            status: RunStatus::Running,
            metadata: None,
        })
        .await
        .unwrap();
    runs.save_result(SaveResult {
        run_id: run.id.clone(),
        field_id: field.id.clone(),
        value: json!({"type": "text", "content": "90 days notice"}),
        metadata: None,
        status: "completed".to_string(),
    })
    .await
    .unwrap();
    runs.update_run_status(&run.id, RunStatus::Completed)
        .await
        .unwrap();

    // Historical view survives template mutation
    templates
        .update_template(
            &template.id,
            quarry::models::UpdateTemplate {
                name: Some("Contract Review v2".to_string()),
                metadata: None,
            },
        )
        .await
        .unwrap();
    let historical = runs.get_run(&run.id).await.unwrap();
    assert_eq!(
        historical.template_snapshot().unwrap().name,
        "Contract Review"
    );

    // Tear down: project deletion is transactional and leaves no grants
    projects.delete_project(&project.id).await.unwrap();
    assert!(projects.get_project(&project.id).await.is_err());
    assert!(permissions
        .list_project_permissions(&project.id)
        .await
        .unwrap()
        .is_empty());

    db.close().await;
}

#[tokio::test]
async fn test_closed_pool_exhausts_retries_with_backoff() {
    let dir = TempDir::new().expect("temp dir");
    let config = config_for(&dir);
    let base = config.retry_base_delay;
    let db = Database::connect(config).await.expect("connect");
    db.close().await;

    let started = Instant::now();
    let result = db.execute("SELECT 1", &[]).await;
    let elapsed = started.elapsed();

    match result {
        Err(QuarryError::TransientQuery { attempts, .. }) => assert_eq!(attempts, 3),
        Err(other) => panic!("expected transient exhaustion, got {other:?}"),
        Ok(rows) => panic!("expected transient exhaustion, got {} rows", rows.len()),
    }
    // Backoff before attempts 2 and 3: base + 2*base
    assert!(elapsed >= base * 3, "elapsed {elapsed:?}");
}

#[tokio::test]
async fn test_fatal_statement_fails_immediately() {
    let dir = TempDir::new().expect("temp dir");
    let config = config_for(&dir);
    let base = config.retry_base_delay;
    let db = Database::connect(config).await.expect("connect");

    let started = Instant::now();
    let result = db.execute("SELECT * FROM no_such_relation", &[]).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(QuarryError::FatalQuery { .. })));
    // No retry happened: a single attempt with no backoff sleep
    assert!(elapsed < base, "elapsed {elapsed:?}");

    let syntax = db.execute("SELEC 1", &[]).await;
    assert!(matches!(syntax, Err(QuarryError::FatalQuery { .. })));
}

#[tokio::test]
async fn test_constraint_violation_is_fatal_not_retried() {
    let dir = TempDir::new().expect("temp dir");
    let db = Database::connect(config_for(&dir)).await.expect("connect");

    db.execute_write(
        "INSERT INTO projects (id, name, created_at, updated_at) VALUES ('p1', 'a', '', '')",
        &[],
    )
    .await
    .unwrap();
    let started = Instant::now();
    let duplicate = db
        .execute_write(
            "INSERT INTO projects (id, name, created_at, updated_at) VALUES ('p1', 'b', '', '')",
            &[],
        )
        .await;
    assert!(matches!(duplicate, Err(QuarryError::FatalQuery { .. })));
    assert!(started.elapsed() < db.config().retry_base_delay);
}

#[tokio::test]
async fn test_cloned_handles_share_one_pool() {
    // Two handles cloned from one Database share the pool; closing one
    // closes the substrate for both.
    let dir = TempDir::new().expect("temp dir");
    let db = Database::connect(config_for(&dir)).await.expect("connect");
    let clone = db.clone();

    db.execute("SELECT 1", &[]).await.unwrap();
    clone.close().await;
    assert!(db.execute("SELECT 1", &[]).await.is_err());
}
