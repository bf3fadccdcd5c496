use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// A file record. The bytes live in the external blob store; this row is
/// the metadata the persistence layer owns.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub storage_path: Option<String>,
    pub owner: Option<String>,
    pub upload_status: String,
    pub processing_status: String,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl StoredFile {
    pub fn upload_status_enum(&self) -> UploadStatus {
        self.upload_status.parse().unwrap_or_default()
    }

    pub fn processing_status_enum(&self) -> ProcessingStatus {
        self.processing_status.parse().unwrap_or_default()
    }

    pub fn metadata_value(&self) -> Value {
        self.metadata
            .as_ref()
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    #[default]
    Pending,
    Uploaded,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for UploadStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(UploadStatus::Pending),
            "uploaded" => Ok(UploadStatus::Uploaded),
            "failed" => Ok(UploadStatus::Failed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Processed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "processed" => Ok(ProcessingStatus::Processed),
            "failed" => Ok(ProcessingStatus::Failed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct CreateFile {
    pub name: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub storage_path: Option<String>,
    pub owner: Option<String>,
    pub metadata: Option<Value>,
}
