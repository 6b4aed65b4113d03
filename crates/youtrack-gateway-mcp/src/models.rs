//! MCP tool parameters.
//!
//! Clients are inconsistent about parameter names (`issue_id` vs `issue_key`,
//! `project` vs `project_id`). Each accepted alias is declared here with
//! `#[serde(alias)]` and resolved once during deserialization:
//!
//! | Alias                       | Canonical      |
//! |-----------------------------|----------------|
//! | `issue_key`, `issue`        | `issue_id`     |
//! | `project`, `project_key`    | `project_id`   |
//! | `field`, `name`             | `field_name`   |
//! | `state`, `new_state`        | `target_state` |
//! | `custom_fields`             | `fields`       |

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

/// Parameters naming one issue.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct IssueParams {
    /// Readable issue ID, e.g. `DEMO-123`.
    #[serde(alias = "issue_key", alias = "issue")]
    pub issue_id: String,
}

/// Parameters for `update_custom_field`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateCustomFieldParams {
    /// Readable issue ID, e.g. `DEMO-123`.
    #[serde(alias = "issue_key", alias = "issue")]
    pub issue_id: String,

    /// Custom field name, e.g. `Priority`. Matched ignoring case.
    #[serde(alias = "field", alias = "name")]
    pub field_name: String,

    /// New value: a string, number, boolean, or null to clear. Multiple enum
    /// values are comma-separated; periods use units like `2h 30m`.
    #[serde(default)]
    pub value: Value,
}

/// Parameters for `update_custom_fields`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateCustomFieldsParams {
    /// Readable issue ID, e.g. `DEMO-123`.
    #[serde(alias = "issue_key", alias = "issue")]
    pub issue_id: String,

    /// Object mapping field names to values, e.g. `{"Priority": "Critical"}`.
    /// A JSON string holding such an object is also accepted.
    #[serde(alias = "custom_fields")]
    pub fields: Value,
}

/// Parameters for `update_issue_state`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateStateParams {
    /// Readable issue ID, e.g. `DEMO-123`.
    #[serde(alias = "issue_key", alias = "issue")]
    pub issue_id: String,

    /// Target state name, e.g. `In Progress`.
    #[serde(alias = "state", alias = "new_state")]
    pub target_state: String,
}

/// Parameters for `update_issue_priority`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdatePriorityParams {
    /// Readable issue ID, e.g. `DEMO-123`.
    #[serde(alias = "issue_key", alias = "issue")]
    pub issue_id: String,

    /// Priority name, e.g. `Critical`.
    pub priority: String,
}

/// Parameters for `update_issue_assignee`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateAssigneeParams {
    /// Readable issue ID, e.g. `DEMO-123`.
    #[serde(alias = "issue_key", alias = "issue")]
    pub issue_id: String,

    /// User login. Omit, or pass an empty string, to unassign.
    #[serde(default, alias = "login", alias = "assignee_login")]
    pub assignee: Option<String>,
}

/// Parameters for `update_issue_type`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateTypeParams {
    /// Readable issue ID, e.g. `DEMO-123`.
    #[serde(alias = "issue_key", alias = "issue")]
    pub issue_id: String,

    /// Issue type name, e.g. `Bug`.
    #[serde(alias = "type")]
    pub issue_type: String,
}

/// Parameters for `update_issue_estimation`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateEstimationParams {
    /// Readable issue ID, e.g. `DEMO-123`.
    #[serde(alias = "issue_key", alias = "issue")]
    pub issue_id: String,

    /// Duration such as `3d 5h` or `90m` (1d = 8h, 1w = 5d).
    #[serde(alias = "estimate")]
    pub estimation: String,
}

/// Parameters naming one project.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ProjectParams {
    /// Project short name (e.g. `DEMO`) or internal ID.
    #[serde(alias = "project", alias = "project_key")]
    pub project_id: String,
}

/// Parameters naming one field of a project.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ProjectFieldParams {
    /// Project short name (e.g. `DEMO`) or internal ID.
    #[serde(alias = "project", alias = "project_key")]
    pub project_id: String,

    /// Custom field name. Matched ignoring case.
    #[serde(alias = "field", alias = "name")]
    pub field_name: String,
}

/// Parameters for `validate_custom_field`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ValidateFieldParams {
    /// Project short name (e.g. `DEMO`) or internal ID.
    #[serde(alias = "project", alias = "project_key")]
    pub project_id: String,

    /// Custom field name. Matched ignoring case.
    #[serde(alias = "field", alias = "name")]
    pub field_name: String,

    /// Value to check.
    #[serde(default)]
    pub value: Value,
}

/// Parameters for `search_issues`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// Query in the tracker's search syntax, e.g. `project: DEMO #Unresolved`.
    pub query: String,

    /// Maximum results (default 10, at most 100).
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Parameters for `create_issue`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateIssueParams {
    /// Project short name (e.g. `DEMO`) or internal ID.
    #[serde(alias = "project", alias = "project_key")]
    pub project_id: String,

    /// One-line summary.
    #[serde(alias = "title")]
    pub summary: String,

    /// Longer description (Markdown).
    #[serde(default)]
    pub description: Option<String>,
}

/// Parameters for `add_comment`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CommentParams {
    /// Readable issue ID, e.g. `DEMO-123`.
    #[serde(alias = "issue_key", alias = "issue")]
    pub issue_id: String,

    /// Comment text (Markdown).
    #[serde(alias = "comment")]
    pub text: String,
}

/// Parameters for `link_issues`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LinkParams {
    /// Issue the link starts from.
    #[serde(alias = "source", alias = "source_id")]
    pub source_issue_id: String,

    /// Issue the link points to.
    #[serde(alias = "target", alias = "target_id")]
    pub target_issue_id: String,

    /// Relationship: relates, depends on, is required for, duplicates,
    /// is duplicated by, parent for, subtask of. Defaults to `relates`.
    #[serde(default = "default_link_type", alias = "relationship")]
    pub link_type: String,
}

/// Parameters for `get_projects`.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListProjectsParams {
    /// Include archived projects. Defaults to `false`.
    #[serde(default, alias = "archived")]
    pub include_archived: bool,
}

/// Parameters for `search_users`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UserSearchParams {
    /// Part of a login, full name or email.
    #[serde(alias = "login", alias = "name")]
    pub query: String,

    /// Maximum results (default 10, at most 100).
    #[serde(default, alias = "max_results")]
    pub limit: Option<u32>,
}

fn default_link_type() -> String {
    "relates".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::canonical(json!({"issue_id": "DEMO-1"}))]
    #[case::issue_key(json!({"issue_key": "DEMO-1"}))]
    #[case::issue(json!({"issue": "DEMO-1"}))]
    fn test_issue_aliases(#[case] input: Value) {
        let params: IssueParams = serde_json::from_value(input).unwrap();
        assert_eq!(params.issue_id, "DEMO-1");
    }

    #[rstest]
    #[case::project(json!({"project": "DEMO", "field": "Priority"}))]
    #[case::project_key(json!({"project_key": "DEMO", "name": "Priority"}))]
    #[case::canonical(json!({"project_id": "DEMO", "field_name": "Priority"}))]
    fn test_project_field_aliases(#[case] input: Value) {
        let params: ProjectFieldParams = serde_json::from_value(input).unwrap();
        assert_eq!(params.project_id, "DEMO");
        assert_eq!(params.field_name, "Priority");
    }

    #[rstest]
    #[case::state(json!({"issue_id": "DEMO-1", "state": "Open"}))]
    #[case::new_state(json!({"issue_key": "DEMO-1", "new_state": "Open"}))]
    fn test_state_aliases(#[case] input: Value) {
        let params: UpdateStateParams = serde_json::from_value(input).unwrap();
        assert_eq!(params.target_state, "Open");
    }

    #[test]
    fn test_custom_fields_alias() {
        let params: UpdateCustomFieldsParams = serde_json::from_value(json!({
            "issue_id": "DEMO-1",
            "custom_fields": {"Priority": "Critical"}
        }))
        .unwrap();
        assert_eq!(params.fields, json!({"Priority": "Critical"}));
    }

    #[test]
    fn test_missing_value_means_clear() {
        let params: UpdateCustomFieldParams =
            serde_json::from_value(json!({"issue_id": "DEMO-1", "field_name": "Assignee"})).unwrap();
        assert_eq!(params.value, Value::Null);
    }

    #[test]
    fn test_project_listing_defaults_to_active() {
        let params: ListProjectsParams = serde_json::from_value(json!({})).unwrap();
        assert!(!params.include_archived);
    }

    #[rstest]
    #[case::query(json!({"query": "jane"}))]
    #[case::login(json!({"login": "jane", "limit": 3}))]
    fn test_user_search_aliases(#[case] input: Value) {
        let params: UserSearchParams = serde_json::from_value(input).unwrap();
        assert_eq!(params.query, "jane");
    }

    #[test]
    fn test_link_type_defaults_to_relates() {
        let params: LinkParams =
            serde_json::from_value(json!({"source": "DEMO-1", "target": "DEMO-2"})).unwrap();
        assert_eq!(params.link_type, "relates");
    }
}
