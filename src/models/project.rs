use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Project {
    pub fn metadata_value(&self) -> Value {
        self.metadata
            .as_ref()
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or(Value::Null)
    }
}

/// Role-based access record linking a user to a project. Unique per
/// (project_id, user_id); re-sharing upserts the role.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PermissionGrant {
    pub project_id: String,
    pub user_id: String,
    pub role: String,
    pub granted_by: Option<String>,
    pub granted_at: String,
}

impl PermissionGrant {
    pub fn role_enum(&self) -> Role {
        self.role.parse().unwrap_or(Role::Viewer)
    }
}

/// Project roles, ordered by capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    #[default]
    Editor,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Role::Owner => 2,
            Role::Editor => 1,
            Role::Viewer => 0,
        }
    }

    /// Whether this role covers `required` (owner covers editor, etc.)
    pub fn satisfies(&self, required: Role) -> bool {
        self.rank() >= required.rank()
    }
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct CreateProject {
    pub name: String,
    pub owner: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Default)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub metadata: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Owner.satisfies(Role::Editor));
        assert!(Role::Owner.satisfies(Role::Viewer));
        assert!(Role::Editor.satisfies(Role::Editor));
        assert!(!Role::Editor.satisfies(Role::Owner));
        assert!(!Role::Viewer.satisfies(Role::Editor));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("OWNER".parse::<Role>().unwrap(), Role::Owner);
        assert_eq!("viewer".parse::<Role>().unwrap(), Role::Viewer);
        assert!("admin".parse::<Role>().is_err());
    }
}
