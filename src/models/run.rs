use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Metadata keys under which the frozen snapshot is stored in a run.
pub const TEMPLATE_SNAPSHOT_KEY: &str = "template_snapshot";
pub const FILE_SNAPSHOT_KEY: &str = "file_snapshot";
pub const PROJECT_CONTEXT_KEY: &str = "project_context";
/// Template metadata key pointing at the template's live run.
pub const ACTIVE_RUN_KEY: &str = "active_run_id";

/// One execution of a template against a project's files.
///
/// The `metadata` document is enriched at creation with a frozen snapshot
/// of the template definition, the project's file set, and project
/// context. Once persisted the snapshot is never mutated by later
/// template/file/project changes; historical runs render identically
/// regardless of present-day state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Run {
    pub id: String,
    pub template_id: String,
    pub project_id: Option<String>,
    pub status: String,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Run {
    pub fn status_enum(&self) -> RunStatus {
        self.status.parse().unwrap_or_default()
    }

    pub fn metadata_value(&self) -> Value {
        self.metadata
            .as_ref()
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or(Value::Null)
    }

    /// The frozen template definition captured when the run was created.
    pub fn template_snapshot(&self) -> Option<crate::models::TemplateSnapshot> {
        let meta = self.metadata_value();
        serde_json::from_value(meta.get(TEMPLATE_SNAPSHOT_KEY)?.clone()).ok()
    }

    /// The frozen file descriptors captured when the run was created.
    pub fn file_snapshot(&self) -> Vec<FileDescriptor> {
        let meta = self.metadata_value();
        meta.get(FILE_SNAPSHOT_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compact file descriptor embedded in a run snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub upload_status: String,
    pub processing_status: String,
}

/// The computed output for one field within one run. Unique per
/// (run_id, field_id): a second save updates the existing row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunResult {
    pub id: String,
    pub run_id: String,
    pub field_id: String,
    /// Structured payload: text/table/chart (JSON)
    pub value: Option<String>,
    /// Independently updatable, e.g. chart display configuration (JSON)
    pub metadata: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl RunResult {
    pub fn value_json(&self) -> Value {
        self.value
            .as_ref()
            .and_then(|v| serde_json::from_str(v).ok())
            .unwrap_or(Value::Null)
    }

    pub fn metadata_value(&self) -> Value {
        self.metadata
            .as_ref()
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Default)]
pub struct CreateRun {
    pub template_id: String,
    pub project_id: Option<String>,
    pub status: RunStatus,
    pub metadata: Option<Value>,
}

#[derive(Debug)]
pub struct SaveResult {
    pub run_id: String,
    pub field_id: String,
    pub value: Value,
    pub metadata: Option<Value>,
    pub status: String,
}
