//! MCP tool implementations.
//!
//! Each tool binds its already-aliased parameters into gateway calls. Values
//! are normalized here, at the boundary: JSON values become
//! [`FieldValue`]s, field maps become ordered pairs, empty assignees become
//! null. Everything past this point is typed.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use youtrack_gateway::{
    BatchResult, ErrorKind, FieldDescriptor, FieldOutcome, FieldValue, Gateway, OperationError,
    OperationResult, ValidatedValue, WorkflowDiagnosis,
};

/// Default result count for searches.
pub const DEFAULT_SEARCH_LIMIT: u32 = 10;

/// Upper bound on result count for searches.
pub const MAX_SEARCH_LIMIT: u32 = 100;

/// Field names used by the dedicated update tools.
pub mod fields {
    /// Priority enum field.
    pub const PRIORITY: &str = "Priority";
    /// Assignee user field.
    pub const ASSIGNEE: &str = "Assignee";
    /// Issue type enum field.
    pub const TYPE: &str = "Type";
    /// Estimation period field.
    pub const ESTIMATION: &str = "Estimation";
}

type ToolResult<T> = Result<T, OperationError>;

/// Tool implementations for the YouTrack MCP server.
pub struct Tools {
    gateway: Gateway,
}

impl Tools {
    /// Create a new Tools instance over `gateway`.
    #[must_use]
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Set any custom field.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the value is not a scalar or the update fails.
    pub async fn update_custom_field(
        &self,
        issue_id: &str,
        field_name: &str,
        value: Value,
    ) -> ToolResult<OperationResult> {
        let value = FieldValue::from_json(field_name, value)?;
        self.gateway.update_field(issue_id.trim(), field_name, value).await
    }

    /// Set several custom fields in one itemized call.
    ///
    /// A value that is not a scalar fails only its own field; the others are
    /// still sent.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when `fields` is not an object (or a
    /// JSON string holding one) or the batch cannot start.
    pub async fn update_custom_fields(
        &self,
        issue_id: &str,
        fields: Value,
    ) -> ToolResult<BatchResult> {
        let issue_id = issue_id.trim();
        let entries = field_pairs(fields)?;
        if entries.is_empty() {
            return self.gateway.update_fields_batch(issue_id, Vec::new()).await;
        }

        let valid: Vec<(String, FieldValue)> = entries
            .iter()
            .filter_map(|(name, value)| value.as_ref().ok().map(|v| (name.clone(), v.clone())))
            .collect();
        let mut sent = if valid.is_empty() {
            Vec::new().into_iter()
        } else {
            self.gateway
                .update_fields_batch(issue_id, valid)
                .await?
                .results
                .into_iter()
        };

        let mut results = Vec::with_capacity(entries.len());
        for (_, value) in entries {
            let outcome = match value {
                Ok(_) => sent.next().ok_or_else(|| {
                    OperationError::new(ErrorKind::Unknown, "Batch returned fewer results than fields")
                        .with_issue(issue_id)
                })?,
                Err(error) => FieldOutcome::Failed(error.with_issue(issue_id)),
            };
            results.push(outcome);
        }
        Ok(BatchResult {
            issue_id: issue_id.to_string(),
            success: results.iter().all(FieldOutcome::is_success),
            results,
        })
    }

    /// Transition an issue's state, falling back to a command on workflow rejection.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when both paths fail or the state is unknown.
    pub async fn update_issue_state(
        &self,
        issue_id: &str,
        target_state: &str,
    ) -> ToolResult<OperationResult> {
        self.gateway.update_state(issue_id.trim(), target_state).await
    }

    /// Set the Priority field.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the update fails.
    pub async fn update_issue_priority(
        &self,
        issue_id: &str,
        priority: &str,
    ) -> ToolResult<OperationResult> {
        self.gateway
            .update_field(issue_id.trim(), fields::PRIORITY, priority.into())
            .await
    }

    /// Set or clear the Assignee field.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the update fails.
    pub async fn update_issue_assignee(
        &self,
        issue_id: &str,
        assignee: Option<&str>,
    ) -> ToolResult<OperationResult> {
        let value = match assignee.map(str::trim) {
            None | Some("") => FieldValue::Null,
            Some(login) if login.eq_ignore_ascii_case("unassigned") => FieldValue::Null,
            Some(login) => login.into(),
        };
        self.gateway
            .update_field(issue_id.trim(), fields::ASSIGNEE, value)
            .await
    }

    /// Set the Type field.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the update fails.
    pub async fn update_issue_type(
        &self,
        issue_id: &str,
        issue_type: &str,
    ) -> ToolResult<OperationResult> {
        self.gateway
            .update_field(issue_id.trim(), fields::TYPE, issue_type.into())
            .await
    }

    /// Set the Estimation field from a duration string.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the duration is malformed or the update fails.
    pub async fn update_issue_estimation(
        &self,
        issue_id: &str,
        estimation: &str,
    ) -> ToolResult<OperationResult> {
        self.gateway
            .update_field(issue_id.trim(), fields::ESTIMATION, estimation.into())
            .await
    }

    /// List a project's custom fields.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the project cannot be read.
    pub async fn get_project_fields(&self, project_id: &str) -> ToolResult<Vec<FieldDescriptor>> {
        self.gateway.get_field_schema(project_id.trim()).await
    }

    /// Read an issue.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the issue cannot be read.
    pub async fn get_issue(&self, issue_id: &str) -> ToolResult<Value> {
        self.gateway.get_issue(issue_id.trim()).await
    }

    /// Read an issue's custom fields as flat values.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the issue cannot be read.
    pub async fn get_issue_custom_fields(
        &self,
        issue_id: &str,
    ) -> ToolResult<BTreeMap<String, FieldValue>> {
        self.gateway.get_issue_fields(issue_id.trim()).await
    }

    /// Check a value against a project field without changing anything.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the value does not fit.
    pub async fn validate_custom_field(
        &self,
        project_id: &str,
        field_name: &str,
        value: Value,
    ) -> ToolResult<ValidatedValue> {
        let value = FieldValue::from_json(field_name, value)?;
        self.gateway
            .validate_field_value(project_id.trim(), field_name, value)
            .await
    }

    /// A field's allowed values.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] for unknown fields.
    pub async fn get_available_custom_field_values(
        &self,
        project_id: &str,
        field_name: &str,
    ) -> ToolResult<FieldDescriptor> {
        self.gateway
            .get_allowed_values(project_id.trim(), field_name)
            .await
    }

    /// Search issues.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the search fails.
    pub async fn search_issues(&self, query: &str, limit: Option<u32>) -> ToolResult<Value> {
        let limit = limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);
        self.gateway.search_issues(query, limit).await
    }

    /// Create an issue.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the create call fails.
    pub async fn create_issue(
        &self,
        project_id: &str,
        summary: &str,
        description: Option<&str>,
    ) -> ToolResult<OperationResult> {
        self.gateway
            .create_issue(project_id.trim(), summary, description)
            .await
    }

    /// Comment on an issue.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the comment call fails.
    pub async fn add_comment(&self, issue_id: &str, text: &str) -> ToolResult<OperationResult> {
        self.gateway.add_comment(issue_id.trim(), text).await
    }

    /// Link two issues.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the link command fails.
    pub async fn link_issues(
        &self,
        source_issue_id: &str,
        target_issue_id: &str,
        link_type: &str,
    ) -> ToolResult<OperationResult> {
        self.gateway
            .link_issues(source_issue_id.trim(), target_issue_id.trim(), link_type)
            .await
    }

    /// List projects.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the listing fails.
    pub async fn get_projects(&self, include_archived: bool) -> ToolResult<Value> {
        self.gateway.get_projects(include_archived).await
    }

    /// Read one project.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the project cannot be read.
    pub async fn get_project(&self, project_id: &str) -> ToolResult<Value> {
        self.gateway.get_project(project_id.trim()).await
    }

    /// Read an issue's comments.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the comments cannot be read.
    pub async fn get_issue_comments(&self, issue_id: &str) -> ToolResult<Value> {
        self.gateway.get_issue_comments(issue_id.trim()).await
    }

    /// Read an issue's links.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the links cannot be read.
    pub async fn get_issue_links(&self, issue_id: &str) -> ToolResult<Value> {
        self.gateway.get_issue_links(issue_id.trim()).await
    }

    /// List link types.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the listing fails.
    pub async fn get_available_link_types(&self) -> ToolResult<Value> {
        self.gateway.get_available_link_types().await
    }

    /// List an issue's attachments.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the attachments cannot be read.
    pub async fn get_issue_attachments(&self, issue_id: &str) -> ToolResult<Value> {
        self.gateway.get_issue_attachments(issue_id.trim()).await
    }

    /// The token's user.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the user cannot be read.
    pub async fn get_current_user(&self) -> ToolResult<Value> {
        self.gateway.get_current_user().await
    }

    /// Find users, clamping `limit` like [`Tools::search_issues`].
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] for an empty query or a failed search.
    pub async fn search_users(&self, query: &str, limit: Option<u32>) -> ToolResult<Value> {
        let limit = limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);
        self.gateway.search_users(query, limit).await
    }

    /// Explain what may block an issue's next state change.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] when the issue has no state field or cannot be read.
    pub async fn diagnose_workflow_restrictions(
        &self,
        issue_id: &str,
    ) -> ToolResult<WorkflowDiagnosis> {
        self.gateway
            .diagnose_workflow_restrictions(issue_id.trim())
            .await
    }
}

/// Run `call` unless `cancelled` resolves first.
///
/// A cancelled call reports `TransientNetwork`: whatever was in flight may or
/// may not have reached the tracker, and repeating it is the way to find out.
///
/// # Errors
///
/// Returns the error of `call`, or a retryable error when cancelled.
pub async fn until_cancelled<T>(
    call: impl Future<Output = ToolResult<T>>,
    cancelled: impl Future<Output = ()>,
) -> ToolResult<T> {
    tokio::select! {
        biased;
        () = cancelled => {
            tracing::info!("Tool call cancelled by client");
            Err(OperationError::new(
                ErrorKind::TransientNetwork,
                "The tool call was cancelled before the tracker answered",
            )
            .with_suggestion("Read the issue to see whether the change was applied, then retry if needed"))
        }
        outcome = call => outcome,
    }
}

type FieldEntry = (String, Result<FieldValue, OperationError>);

/// Turn a field map (or a JSON string holding one) into ordered entries.
///
/// Each entry carries its own conversion result so a nested value fails only
/// that field.
fn field_pairs(fields: Value) -> ToolResult<Vec<FieldEntry>> {
    let map: Map<String, Value> = match fields {
        Value::Object(map) => map,
        Value::String(text) => match serde_json::from_str(&text) {
            Ok(Value::Object(map)) => map,
            _ => return Err(not_a_field_map()),
        },
        _ => return Err(not_a_field_map()),
    };

    Ok(map
        .into_iter()
        .map(|(name, value)| {
            let value = FieldValue::from_json(&name, value);
            (name, value)
        })
        .collect())
}

fn not_a_field_map() -> OperationError {
    OperationError::new(
        ErrorKind::ValidationError,
        "fields must be an object mapping field names to values",
    )
    .with_suggestion(r#"Pass e.g. {"Priority": "Critical", "Estimation": "2h"}"#)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::future::{pending, ready};

    #[tokio::test]
    async fn test_cancelled_call_is_retryable() {
        let outcome: ToolResult<()> = until_cancelled(pending(), ready(())).await;
        let error = outcome.unwrap_err();
        assert_eq!(error.kind, ErrorKind::TransientNetwork);
        assert!(error.retryable);
    }

    #[tokio::test]
    async fn test_uncancelled_call_passes_through() {
        let outcome = until_cancelled(ready(Ok(7_u32)), pending()).await;
        assert_eq!(outcome, Ok(7));

        let failure = OperationError::validation("Priority", "bad value");
        let outcome: ToolResult<u32> = until_cancelled(ready(Err(failure.clone())), pending()).await;
        assert_eq!(outcome, Err(failure));
    }

    #[test]
    fn test_field_pairs_keep_order() {
        let pairs = field_pairs(json!({"Type": "Bug", "Priority": "Critical", "Assignee": null}))
            .unwrap();
        let names: Vec<&str> = pairs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Type", "Priority", "Assignee"]);
        assert_eq!(pairs[2].1, Ok(FieldValue::Null));
    }

    #[test]
    fn test_field_pairs_accept_json_string() {
        let pairs = field_pairs(json!(r#"{"Priority": "Major"}"#)).unwrap();
        let expected: Vec<FieldEntry> = vec![("Priority".to_string(), Ok(FieldValue::from("Major")))];
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_field_pairs_reject_arrays() {
        let error = field_pairs(json!(["Priority"])).unwrap_err();
        assert_eq!(error.kind, ErrorKind::ValidationError);
    }

    #[test]
    fn test_field_pairs_isolate_nested_values() {
        let pairs =
            field_pairs(json!({"Assignee": {"login": "jane"}, "Priority": "Major"})).unwrap();
        assert_eq!(pairs.len(), 2);
        let error = pairs[0].1.as_ref().unwrap_err();
        assert_eq!(error.field.as_deref(), Some("Assignee"));
        assert_eq!(pairs[1].1, Ok(FieldValue::from("Major")));
    }
}
