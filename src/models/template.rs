use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// A reusable structured document definition composed of ordered fields.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
    /// Unstructured key/value document (JSON)
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Template {
    /// Decode the metadata document; `Null` when absent or unparseable.
    pub fn metadata_value(&self) -> Value {
        self.metadata
            .as_ref()
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or(Value::Null)
    }
}

/// One named unit of a template (shown in the UI as a "Section").
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TemplateField {
    pub id: String,
    pub template_id: String,
    pub name: String,
    pub description: Option<String>,
    pub sort_order: i64,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TemplateField {
    pub fn metadata_value(&self) -> Value {
        self.metadata
            .as_ref()
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or(Value::Null)
    }
}

/// Append-only change record. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TemplateVersion {
    pub id: i64,
    pub template_id: String,
    /// Monotonic per template, never reused
    pub version_number: i64,
    pub change_type: String,
    pub change_description: String,
    /// Full template state after the change (JSON), used by restore
    pub snapshot: Option<String>,
    pub created_at: String,
}

impl TemplateVersion {
    pub fn change_type_enum(&self) -> ChangeType {
        self.change_type.parse().unwrap_or(ChangeType::MetadataUpdated)
    }
}

/// What kind of change a version record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Renamed,
    MetadataUpdated,
    FieldAdded,
    FieldUpdated,
    FieldRemoved,
    Reordered,
    Restored,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Renamed => "renamed",
            ChangeType::MetadataUpdated => "metadata_updated",
            ChangeType::FieldAdded => "field_added",
            ChangeType::FieldUpdated => "field_updated",
            ChangeType::FieldRemoved => "field_removed",
            ChangeType::Reordered => "reordered",
            ChangeType::Restored => "restored",
        }
    }
}

impl std::str::FromStr for ChangeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ChangeType::Created),
            "renamed" => Ok(ChangeType::Renamed),
            "metadata_updated" => Ok(ChangeType::MetadataUpdated),
            "field_added" => Ok(ChangeType::FieldAdded),
            "field_updated" => Ok(ChangeType::FieldUpdated),
            "field_removed" => Ok(ChangeType::FieldRemoved),
            "reordered" => Ok(ChangeType::Reordered),
            "restored" => Ok(ChangeType::Restored),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Full template state captured in a version record and in run snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSnapshot {
    pub version: i64,
    pub name: String,
    pub metadata: Value,
    pub fields: Vec<FieldSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSnapshot {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub sort_order: i64,
    pub metadata: Value,
}

#[derive(Debug, Default)]
pub struct CreateTemplate {
    pub name: String,
    pub owner: Option<String>,
    pub metadata: Option<Value>,
}

/// Intended changes for a template. `None` means "leave unchanged"; only
/// attributes whose new value actually differs are written.
#[derive(Debug, Default)]
pub struct UpdateTemplate {
    pub name: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Default)]
pub struct CreateField {
    pub name: String,
    pub description: Option<String>,
    /// Appended after the current last field when `None`
    pub sort_order: Option<i64>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Default)]
pub struct UpdateField {
    pub name: Option<String>,
    pub description: Option<String>,
    pub sort_order: Option<i64>,
    pub metadata: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_type_round_trip() {
        for ct in [
            ChangeType::Created,
            ChangeType::Renamed,
            ChangeType::MetadataUpdated,
            ChangeType::FieldAdded,
            ChangeType::FieldUpdated,
            ChangeType::FieldRemoved,
            ChangeType::Reordered,
            ChangeType::Restored,
        ] {
            assert_eq!(ct.as_str().parse::<ChangeType>().unwrap(), ct);
        }
        assert!("bogus".parse::<ChangeType>().is_err());
    }

    #[test]
    fn test_metadata_value_handles_absent_and_invalid() {
        let mut template = Template {
            id: "tpl-1".to_string(),
            name: "T".to_string(),
            owner: None,
            metadata: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(template.metadata_value(), Value::Null);

        template.metadata = Some("{not json".to_string());
        assert_eq!(template.metadata_value(), Value::Null);

        template.metadata = Some(r#"{"description":"d"}"#.to_string());
        assert_eq!(template.metadata_value(), json!({"description": "d"}));
    }
}
