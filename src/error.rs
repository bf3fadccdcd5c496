use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuarryError {
    /// Unrecoverable setup failure. Cached by the pool manager and returned
    /// on every subsequent initialization attempt without reconstruction.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Structural/programming failure from the store (malformed statement,
    /// unknown column or relation, constraint violation). Never retried.
    #[error("Fatal query error: {message}")]
    FatalQuery { message: String },

    /// Connectivity/contention failure that survived every retry attempt.
    #[error("Query failed after {attempts} attempts: {message}")]
    TransientQuery { message: String, attempts: u32 },

    /// A bound parameter was rejected before the statement reached the store.
    #[error("Invalid parameter: {0}")]
    Validation(String),

    /// The authorization resolver denied access. An outcome, not a fault.
    #[error("Access denied for user {user_id} on {resource}")]
    AccessDenied { user_id: String, resource: String },

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Version {version} not found for template {template_id}")]
    VersionNotFound { template_id: String, version: i64 },

    #[error("No result for field {field_id} in run {run_id}")]
    ResultNotFound { run_id: String, field_id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QuarryError>;
