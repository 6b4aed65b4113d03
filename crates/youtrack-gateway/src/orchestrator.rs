//! Operation orchestrator.
//!
//! [`Gateway`] is the entry point for every capability. Each operation runs
//! the same pipeline: read what it needs (issue snapshot, project schema),
//! encode caller values through the codec, send through the retry governor,
//! and classify any failure into an [`OperationError`]. Raw transport
//! failures never escape.
//!
//! State changes get one extra step: when the direct field update is rejected
//! by a workflow rule, the same change is retried once through the tracker's
//! command endpoint. The result's `via` field records which path won.

use crate::classify::{Classifier, ClassifyContext, ErrorKind, OperationError};
use crate::codec::{self, FieldDescriptor, FieldValue};
use crate::config::GatewayConfig;
use crate::retry::{Idempotency, RetryError, RetryPolicy};
use crate::schema::{ISSUE_FIELDS_SELECTOR, IssueSnapshot, PROJECT_FIELDS_SELECTOR, ProjectSchema};
use crate::transport::{ApiRequest, HttpTransport, Transport};
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Response fields requested after a field update.
const UPDATED_ISSUE_SELECTOR: &str =
    "idReadable,customFields(name,value(name,login,minutes,presentation,text))";

/// Response fields for a full issue read.
const ISSUE_SELECTOR: &str = "id,idReadable,summary,description,created,updated,resolved,\
project(id,shortName,name),reporter(login,fullName),\
customFields(name,$type,value(name,login,minutes,presentation,text))";

/// Response fields for search results.
const SEARCH_SELECTOR: &str = "idReadable,summary,created,updated,resolved,project(shortName),\
customFields(name,value(name,login,minutes,presentation,text))";

/// Link type names accepted from callers, mapped to command phrases.
const LINK_PHRASES: &[(&str, &str)] = &[
    ("relates", "relates to"),
    ("relates to", "relates to"),
    ("depends on", "depends on"),
    ("is required for", "is required for"),
    ("duplicates", "duplicates"),
    ("is duplicated by", "is duplicated by"),
    ("parent", "parent for"),
    ("parent for", "parent for"),
    ("subtask", "subtask of"),
    ("subtask of", "subtask of"),
];

/// Which endpoint applied a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePath {
    /// `POST issues/{id}` with custom field fragments.
    Direct,
    /// `POST commands` with a text command.
    Command,
}

/// Uniform success envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Always `true`; failures are [`OperationError`]s.
    pub success: bool,
    /// Issue the operation applied to.
    pub issue_id: String,
    /// Field the operation changed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    /// Field value before the change, when it could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_value_hint: Option<String>,
    /// What happened, in one sentence.
    pub message: String,
    /// Endpoint that applied the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<UpdatePath>,
    /// The tracker's response body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl OperationResult {
    fn new(issue_id: &str, message: impl Into<String>) -> Self {
        Self {
            success: true,
            issue_id: issue_id.to_string(),
            field_name: None,
            previous_value_hint: None,
            message: message.into(),
            via: None,
            raw: None,
        }
    }
}

/// Outcome of one field within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldOutcome {
    /// The field was updated.
    Updated(OperationResult),
    /// The field was not updated.
    Failed(OperationError),
}

impl FieldOutcome {
    /// Whether this item succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Updated(_))
    }
}

/// Itemized result of a multi-field update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Target issue.
    pub issue_id: String,
    /// `true` only when every item succeeded.
    pub success: bool,
    /// One outcome per requested field, in request order.
    pub results: Vec<FieldOutcome>,
}

/// A value that passed a dry-run encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedValue {
    /// The field, as the project defines it.
    pub field: FieldDescriptor,
    /// The value in canonical form.
    pub value: FieldValue,
    /// The fragment that would be sent.
    pub wire: Value,
}

/// Gateway to one tracker instance.
///
/// Construct once per process (or per test) and pass it explicitly; clones
/// share the transport.
#[derive(Clone)]
pub struct Gateway {
    transport: Arc<dyn Transport>,
    classifier: Classifier,
    policy: RetryPolicy,
}

impl Gateway {
    /// Create a gateway over any transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            classifier: Classifier::default(),
            policy,
        }
    }

    /// Create a gateway over HTTP from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is incomplete or the HTTP
    /// client cannot be built.
    pub fn connect(config: &GatewayConfig) -> crate::Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(config)?;
        info!(api_root = %transport.api_root(), "Connected to tracker");
        Ok(Self::new(Arc::new(transport), config.retry_policy()))
    }

    /// Replace the failure classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Release the gateway; in-flight clones keep the transport alive.
    pub fn close(self) {
        debug!("Gateway closed");
    }

    /// Send one request under the retry policy, classifying any failure.
    pub(crate) async fn call(
        &self,
        request: ApiRequest,
        idempotency: Idempotency,
        context: &ClassifyContext,
    ) -> Result<Value, OperationError> {
        let transport = &self.transport;
        let request = &request;
        self.policy
            .execute(idempotency, move || transport.send(request))
            .await
            .map(|response| response.body)
            .map_err(|error| match error {
                RetryError::Exhausted(error) => error.in_context(context),
                RetryError::Fatal(failure) => {
                    let error = self.classifier.classify_failure(&failure, context);
                    debug!(kind = %error.kind, status = ?error.http_status, "Request failed");
                    error
                }
            })
    }

    async fn snapshot(&self, issue_id: &str) -> Result<IssueSnapshot, OperationError> {
        let request = ApiRequest::get(format!("issues/{issue_id}")).fields(ISSUE_FIELDS_SELECTOR);
        let body = self
            .call(request, Idempotency::Idempotent, &ClassifyContext::issue(issue_id))
            .await?;
        Ok(IssueSnapshot::from_wire(&body))
    }

    async fn project_schema(&self, project_id: &str) -> Result<ProjectSchema, OperationError> {
        let request = ApiRequest::get(format!("admin/projects/{project_id}/customFields"))
            .fields(PROJECT_FIELDS_SELECTOR)
            .query("$top", "-1");
        let context = ClassifyContext::default();
        let body = self
            .call(request, Idempotency::Idempotent, &context)
            .await
            .map_err(|e| project_error(e, project_id))?;
        let schema = ProjectSchema::from_wire(project_id, &body);
        debug!(project = project_id, fields = schema.fields.len(), "Loaded field schema");
        Ok(schema)
    }

    /// Snapshot the issue and load its project's schema.
    pub(crate) async fn issue_context(
        &self,
        issue_id: &str,
    ) -> Result<(IssueSnapshot, ProjectSchema), OperationError> {
        let snapshot = self.snapshot(issue_id).await?;
        let project = snapshot.project().ok_or_else(|| {
            OperationError::new(
                ErrorKind::Unknown,
                format!("Could not determine the project of issue '{issue_id}'"),
            )
            .with_issue(issue_id)
            .with_suggestion("Check that the token's user can read the issue's project")
        })?;
        let schema = self.project_schema(project).await?;
        Ok((snapshot, schema))
    }

    /// The custom fields of a project.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] if the project cannot be read.
    pub async fn get_field_schema(
        &self,
        project_id: &str,
    ) -> Result<Vec<FieldDescriptor>, OperationError> {
        check_id("project", project_id)?;
        Ok(self.project_schema(project_id).await?.fields)
    }

    /// Set one custom field.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` without sending anything when the field is
    /// unknown or the value does not fit it; otherwise the classified failure
    /// of the update call.
    pub async fn update_field(
        &self,
        issue_id: &str,
        field_name: &str,
        value: FieldValue,
    ) -> Result<OperationResult, OperationError> {
        check_id("issue", issue_id)?;
        let (snapshot, schema) = self.issue_context(issue_id).await?;
        self.apply_field(issue_id, &snapshot, &schema, field_name, &value)
            .await
    }

    /// Set several fields, one call per field, in order.
    ///
    /// Every field gets its own outcome; one failure does not stop the rest.
    ///
    /// # Errors
    ///
    /// Returns an error only when the batch cannot start: an empty field
    /// list or an unreadable issue or project.
    pub async fn update_fields_batch(
        &self,
        issue_id: &str,
        fields: Vec<(String, FieldValue)>,
    ) -> Result<BatchResult, OperationError> {
        check_id("issue", issue_id)?;
        if fields.is_empty() {
            return Err(OperationError::new(
                ErrorKind::ValidationError,
                "No fields to update",
            )
            .with_issue(issue_id)
            .with_suggestion("Pass at least one field name and value"));
        }

        let (snapshot, schema) = self.issue_context(issue_id).await?;
        let mut results = Vec::with_capacity(fields.len());
        for (name, value) in &fields {
            let outcome = match self.apply_field(issue_id, &snapshot, &schema, name, value).await {
                Ok(result) => FieldOutcome::Updated(result),
                Err(error) => {
                    warn!(issue = issue_id, field = %name, kind = %error.kind, "Batch item failed");
                    FieldOutcome::Failed(error)
                }
            };
            results.push(outcome);
        }

        let success = results.iter().all(FieldOutcome::is_success);
        info!(
            issue = issue_id,
            total = results.len(),
            failed = results.iter().filter(|r| !r.is_success()).count(),
            "Batch update finished"
        );
        Ok(BatchResult {
            issue_id: issue_id.to_string(),
            success,
            results,
        })
    }

    async fn apply_field(
        &self,
        issue_id: &str,
        snapshot: &IssueSnapshot,
        schema: &ProjectSchema,
        field_name: &str,
        value: &FieldValue,
    ) -> Result<OperationResult, OperationError> {
        let descriptor = resolve_field(schema, issue_id, field_name)?;
        let fragment = codec::encode(descriptor, value).map_err(|e| e.with_issue(issue_id))?;
        let previous = previous_value(snapshot, descriptor);
        let context = ClassifyContext::field(issue_id, &descriptor.name, value.to_string())
            .with_current(previous.clone());

        let request = ApiRequest::post(
            format!("issues/{issue_id}"),
            json!({ "customFields": [fragment] }),
        )
        .fields(UPDATED_ISSUE_SELECTOR);
        let raw = self.call(request, Idempotency::Idempotent, &context).await?;

        let shown = codec::decode(descriptor, &fragment["value"]);
        info!(issue = issue_id, field = %descriptor.name, value = %shown, "Field updated");
        Ok(OperationResult {
            field_name: Some(descriptor.name.clone()),
            previous_value_hint: previous,
            via: Some(UpdatePath::Direct),
            raw: Some(raw),
            ..OperationResult::new(
                issue_id,
                format!("Set {} to {shown}", descriptor.name),
            )
        })
    }

    /// Move an issue to `target_state`.
    ///
    /// Tries the direct field update first. If a workflow rule rejects it,
    /// applies the same change once through the command endpoint.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for an unknown state, the classified error
    /// of the direct attempt when it fails for any reason other than a
    /// workflow rejection, or the classified error of the fallback.
    pub async fn update_state(
        &self,
        issue_id: &str,
        target_state: &str,
    ) -> Result<OperationResult, OperationError> {
        check_id("issue", issue_id)?;
        let (snapshot, schema) = self.issue_context(issue_id).await?;
        let descriptor = schema
            .state_field()
            .or_else(|| schema.find("State"))
            .ok_or_else(|| {
                OperationError::validation("State", "This issue's project has no state field")
                    .with_issue(issue_id)
                    .with_suggestion(format!("Available fields: {}", schema.names().join(", ")))
            })?;

        let value = FieldValue::from(target_state);
        let wire = codec::encode_value(descriptor, &value).map_err(|e| e.with_issue(issue_id))?;
        let target = codec::decode(descriptor, &wire).to_string();
        let previous = previous_value(&snapshot, descriptor);

        let direct = self
            .apply_field(issue_id, &snapshot, &schema, &descriptor.name, &value)
            .await;
        let rejection = match direct {
            Ok(mut result) => {
                result.message = format!(
                    "{} changed to {target} via direct field update",
                    descriptor.name
                );
                return Ok(result);
            }
            Err(error) if error.kind == ErrorKind::WorkflowRestricted => error,
            Err(error) => return Err(error),
        };

        warn!(
            issue = issue_id,
            target = %target,
            "Direct state update rejected by workflow, trying command endpoint"
        );
        let query = command_query(&descriptor.name, &target);
        let context = ClassifyContext::field(issue_id, &descriptor.name, target.clone())
            .with_current(previous.clone());
        let request = ApiRequest::post(
            "commands",
            json!({ "query": query, "issues": [{ "idReadable": issue_id }] }),
        );

        match self.call(request, Idempotency::Idempotent, &context).await {
            Ok(raw) => {
                info!(issue = issue_id, target = %target, "State changed via command endpoint");
                Ok(OperationResult {
                    field_name: Some(descriptor.name.clone()),
                    previous_value_hint: previous,
                    via: Some(UpdatePath::Command),
                    raw: Some(raw),
                    ..OperationResult::new(
                        issue_id,
                        format!(
                            "{} changed to {target} via command fallback (direct update was rejected: {})",
                            descriptor.name, rejection.summary
                        ),
                    )
                })
            }
            Err(error) => {
                let guidance = if error.guidance.is_empty() {
                    rejection.guidance.clone()
                } else {
                    error.guidance.clone()
                };
                Err(OperationError {
                    guidance: format!(
                        "Both the direct update and the command `{query}` were rejected. {guidance}"
                    ),
                    ..error
                })
            }
        }
    }

    /// Read an issue, adding ISO-8601 companions for its timestamps.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the read.
    pub async fn get_issue(&self, issue_id: &str) -> Result<Value, OperationError> {
        check_id("issue", issue_id)?;
        let request = ApiRequest::get(format!("issues/{issue_id}")).fields(ISSUE_SELECTOR);
        let mut body = self
            .call(request, Idempotency::Idempotent, &ClassifyContext::issue(issue_id))
            .await?;
        add_iso_timestamps(&mut body);
        Ok(body)
    }

    /// An issue's custom fields as flat values.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the read.
    pub async fn get_issue_fields(
        &self,
        issue_id: &str,
    ) -> Result<BTreeMap<String, FieldValue>, OperationError> {
        check_id("issue", issue_id)?;
        let snapshot = self.snapshot(issue_id).await?;
        Ok(snapshot
            .fields
            .iter()
            .map(|field| (field.name.clone(), codec::decode(&field.descriptor(), &field.value)))
            .collect())
    }

    /// Check that `value` fits a project field without changing anything.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` when the field is unknown or the value
    /// does not fit, or the classified failure of the schema read.
    pub async fn validate_field_value(
        &self,
        project_id: &str,
        field_name: &str,
        value: FieldValue,
    ) -> Result<ValidatedValue, OperationError> {
        check_id("project", project_id)?;
        let schema = self.project_schema(project_id).await?;
        let descriptor = resolve_field(&schema, project_id, field_name)
            .map_err(|e| OperationError { issue_id: None, ..e })?;
        let wire = codec::encode(descriptor, &value)?;
        Ok(ValidatedValue {
            field: descriptor.clone(),
            value: codec::decode(descriptor, &wire["value"]),
            wire,
        })
    }

    /// A project field with its allowed values.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for an unknown field, or the classified
    /// failure of the schema read.
    pub async fn get_allowed_values(
        &self,
        project_id: &str,
        field_name: &str,
    ) -> Result<FieldDescriptor, OperationError> {
        check_id("project", project_id)?;
        let schema = self.project_schema(project_id).await?;
        resolve_field(&schema, project_id, field_name)
            .cloned()
            .map_err(|e| OperationError { issue_id: None, ..e })
    }

    /// Search issues with the tracker's query language.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the search.
    pub async fn search_issues(&self, query: &str, limit: u32) -> Result<Value, OperationError> {
        let request = ApiRequest::get("issues")
            .query("query", query)
            .query("$top", limit.max(1).to_string())
            .fields(SEARCH_SELECTOR);
        let mut body = self
            .call(request, Idempotency::Idempotent, &ClassifyContext::default())
            .await?;
        if let Value::Array(issues) = &mut body {
            issues.iter_mut().for_each(add_iso_timestamps);
        }
        debug!(query, hits = body.as_array().map_or(0, Vec::len), "Search finished");
        Ok(body)
    }

    /// Create an issue. Never retried.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for an empty summary, or the classified
    /// failure of the project lookup or create call.
    pub async fn create_issue(
        &self,
        project_id: &str,
        summary: &str,
        description: Option<&str>,
    ) -> Result<OperationResult, OperationError> {
        check_id("project", project_id)?;
        if summary.trim().is_empty() {
            return Err(OperationError::validation("summary", "Summary must not be empty"));
        }
        let project = self.resolve_project_id(project_id).await?;

        let mut body = json!({ "project": { "id": project }, "summary": summary.trim() });
        if let Some(description) = description.filter(|d| !d.trim().is_empty()) {
            body["description"] = Value::String(description.to_string());
        }
        let request = ApiRequest::post("issues", body).fields("id,idReadable,summary");
        let raw = self
            .call(request, Idempotency::NonIdempotent, &ClassifyContext::default())
            .await?;

        let id = raw
            .get("idReadable")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        info!(issue = %id, project = project_id, "Issue created");
        Ok(OperationResult {
            raw: Some(raw),
            ..OperationResult::new(&id, format!("Created issue {id}"))
        })
    }

    /// Internal project ID for a short name or ID.
    async fn resolve_project_id(&self, project: &str) -> Result<String, OperationError> {
        if is_internal_id(project) {
            return Ok(project.to_string());
        }
        let request = ApiRequest::get(format!("admin/projects/{project}")).fields("id,shortName");
        let body = self
            .call(request, Idempotency::Idempotent, &ClassifyContext::default())
            .await
            .map_err(|e| project_error(e, project))?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                OperationError::new(ErrorKind::NotFound, format!("Project '{project}' was not found"))
            })
    }

    /// Comment on an issue. Never retried.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for empty text, or the classified failure
    /// of the call.
    pub async fn add_comment(
        &self,
        issue_id: &str,
        text: &str,
    ) -> Result<OperationResult, OperationError> {
        check_id("issue", issue_id)?;
        if text.trim().is_empty() {
            return Err(OperationError::validation("text", "Comment text must not be empty")
                .with_issue(issue_id));
        }
        let request = ApiRequest::post(
            format!("issues/{issue_id}/comments"),
            json!({ "text": text }),
        )
        .fields("id,text,created");
        let raw = self
            .call(request, Idempotency::NonIdempotent, &ClassifyContext::issue(issue_id))
            .await?;
        info!(issue = issue_id, "Comment added");
        Ok(OperationResult {
            raw: Some(raw),
            ..OperationResult::new(issue_id, format!("Added comment to {issue_id}"))
        })
    }

    /// Link two issues through the command endpoint.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the command.
    pub async fn link_issues(
        &self,
        source_id: &str,
        target_id: &str,
        link_type: &str,
    ) -> Result<OperationResult, OperationError> {
        check_id("issue", source_id)?;
        check_id("issue", target_id)?;
        let requested = link_type.trim().to_lowercase();
        let phrase = LINK_PHRASES
            .iter()
            .find(|(name, _)| *name == requested)
            .map_or(requested.as_str(), |(_, phrase)| *phrase);
        let query = format!("{phrase} {target_id}");

        let request = ApiRequest::post(
            "commands",
            json!({ "query": query, "issues": [{ "idReadable": source_id }] }),
        );
        let raw = self
            .call(request, Idempotency::Idempotent, &ClassifyContext::issue(source_id))
            .await?;
        info!(source = source_id, target = target_id, command = %query, "Issues linked");
        Ok(OperationResult {
            via: Some(UpdatePath::Command),
            raw: Some(raw),
            ..OperationResult::new(
                source_id,
                format!("Linked {source_id} {phrase} {target_id}"),
            )
        })
    }
}

fn resolve_field<'s>(
    schema: &'s ProjectSchema,
    issue_id: &str,
    field_name: &str,
) -> Result<&'s FieldDescriptor, OperationError> {
    schema.find(field_name).ok_or_else(|| {
        OperationError::validation(
            field_name,
            format!(
                "Field '{field_name}' does not exist in project '{}'",
                schema.project_id
            ),
        )
        .with_issue(issue_id)
        .with_suggestion(format!("Available fields: {}", schema.names().join(", ")))
    })
}

fn previous_value(snapshot: &IssueSnapshot, descriptor: &FieldDescriptor) -> Option<String> {
    snapshot
        .field(&descriptor.name)
        .map(|field| codec::decode(descriptor, &field.value))
        .filter(|value| !value.is_null())
        .map(|value| value.to_string())
}

pub(crate) fn project_error(error: OperationError, project: &str) -> OperationError {
    if error.kind == ErrorKind::NotFound {
        OperationError {
            summary: format!("Project '{project}' was not found"),
            issue_id: None,
            ..error
        }
    } else {
        error
    }
}

/// Text command setting `field` to `value`; multi-word values are quoted.
fn command_query(field: &str, value: &str) -> String {
    if value.contains(char::is_whitespace) {
        format!("{field} \"{value}\"")
    } else {
        format!("{field} {value}")
    }
}

/// Internal IDs look like `0-12`; short names and readable IDs do not.
fn is_internal_id(id: &str) -> bool {
    id.split_once('-').is_some_and(|(a, b)| {
        !a.is_empty()
            && !b.is_empty()
            && a.chars().all(|c| c.is_ascii_digit())
            && b.chars().all(|c| c.is_ascii_digit())
    })
}

pub(crate) fn check_id(what: &str, id: &str) -> Result<(), OperationError> {
    let valid = !id.is_empty()
        && !id.chars().all(|c| c == '.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(OperationError::new(
            ErrorKind::ValidationError,
            format!("Invalid {what} ID '{id}'"),
        )
        .with_suggestion(format!(
            "Use the readable {what} ID, e.g. {}",
            if what == "issue" { "DEMO-123" } else { "DEMO" }
        )))
    }
}

pub(crate) fn add_iso_timestamps(issue: &mut Value) {
    let Value::Object(map) = issue else {
        return;
    };
    let stamps: Map<String, Value> = ["created", "updated", "resolved"]
        .iter()
        .filter_map(|key| {
            let millis = map.get(*key)?.as_i64()?;
            let at = DateTime::from_timestamp_millis(millis)?;
            Some((
                format!("{key}_iso8601"),
                Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ))
        })
        .collect();
    map.extend(stamps);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Method, MockReply, MockTransport};
    use rstest::rstest;

    const ISSUE: &str = "issues/DEMO-123";
    const SCHEMA: &str = "admin/projects/0-1/customFields";

    fn issue_body() -> Value {
        json!({
            "idReadable": "DEMO-123",
            "project": {"id": "0-1", "shortName": "DEMO"},
            "customFields": [
                {"name": "State", "$type": "StateIssueCustomField", "value": {"name": "Open"}},
                {"name": "Priority", "$type": "SingleEnumIssueCustomField", "value": {"name": "Normal"}},
                {"name": "Type", "$type": "SingleEnumIssueCustomField", "value": {"name": "Bug"}}
            ]
        })
    }

    fn schema_body() -> Value {
        json!([
            {
                "field": {"name": "State", "fieldType": {"valueType": "state[1]"}},
                "bundle": {"values": [{"name": "Open"}, {"name": "In Progress"}, {"name": "Fixed"}]}
            },
            {
                "field": {"name": "Priority", "fieldType": {"valueType": "enum[1]"}},
                "bundle": {"values": [{"name": "Critical"}, {"name": "Normal"}]}
            },
            {
                "field": {"name": "Type", "fieldType": {"valueType": "enum[1]"}},
                "bundle": {"values": [{"name": "Bug"}, {"name": "Feature"}]}
            }
        ])
    }

    fn tracker() -> MockTransport {
        MockTransport::new()
            .on(Method::Get, ISSUE, MockReply::Json(issue_body()))
            .on(Method::Get, SCHEMA, MockReply::Json(schema_body()))
    }

    fn gateway(transport: MockTransport) -> (Gateway, Arc<MockTransport>) {
        let transport = Arc::new(transport);
        let gateway = Gateway::new(transport.clone(), RetryPolicy::immediate(3));
        (gateway, transport)
    }

    #[tokio::test]
    async fn test_update_field_sends_encoded_fragment() {
        let (gateway, transport) =
            gateway(tracker().on(Method::Post, ISSUE, MockReply::Json(json!({}))));

        let result = gateway
            .update_field("DEMO-123", "priority", "critical".into())
            .await
            .unwrap();

        assert_eq!(result.field_name.as_deref(), Some("Priority"));
        assert_eq!(result.previous_value_hint.as_deref(), Some("Normal"));
        assert_eq!(result.via, Some(UpdatePath::Direct));

        let posts = transport.requests_with(Method::Post);
        assert_eq!(posts.len(), 1);
        assert_eq!(
            posts[0].body.as_ref().unwrap()["customFields"][0],
            json!({"name": "Priority", "$type": "SingleEnumIssueCustomField", "value": {"name": "Critical"}})
        );
    }

    #[tokio::test]
    async fn test_invalid_enum_value_sends_nothing() {
        let (gateway, transport) = gateway(tracker());

        let error = gateway
            .update_field("DEMO-123", "Priority", "Urgent".into())
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::ValidationError);
        assert_eq!(error.issue_id.as_deref(), Some("DEMO-123"));
        assert!(transport.requests_with(Method::Post).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_field_lists_available_fields() {
        let (gateway, transport) = gateway(tracker());

        let error = gateway
            .update_field("DEMO-123", "Severity", "High".into())
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::ValidationError);
        assert!(error.suggestions[0].contains("State, Priority, Type"));
        assert!(transport.requests_with(Method::Post).is_empty());
    }

    #[tokio::test]
    async fn test_batch_is_itemized() {
        let (gateway, transport) =
            gateway(tracker().on(Method::Post, ISSUE, MockReply::Json(json!({}))));

        let batch = gateway
            .update_fields_batch(
                "DEMO-123",
                vec![
                    ("Priority".to_string(), "Critical".into()),
                    ("Type".to_string(), "NoSuchType".into()),
                ],
            )
            .await
            .unwrap();

        assert!(!batch.success);
        assert_eq!(batch.results.len(), 2);
        assert!(batch.results[0].is_success());
        match &batch.results[1] {
            FieldOutcome::Failed(error) => {
                assert_eq!(error.kind, ErrorKind::ValidationError);
                assert_eq!(error.field.as_deref(), Some("Type"));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let posts = transport.requests_with(Method::Post);
        assert_eq!(posts.len(), 1);
        assert_eq!(
            posts[0].body.as_ref().unwrap()["customFields"][0]["value"]["name"],
            "Critical"
        );
        // schema is fetched once for the whole batch
        assert_eq!(
            transport
                .requests_with(Method::Get)
                .iter()
                .filter(|r| r.path == SCHEMA)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_batch_continues_after_tracker_rejection() {
        let (gateway, _) = gateway(
            tracker()
                .on(Method::Post, ISSUE, MockReply::Status(403, r#"{"error":"Forbidden"}"#.into()))
                .on(Method::Post, ISSUE, MockReply::Json(json!({}))),
        );

        let batch = gateway
            .update_fields_batch(
                "DEMO-123",
                vec![
                    ("Priority".to_string(), "Critical".into()),
                    ("Type".to_string(), "Feature".into()),
                ],
            )
            .await
            .unwrap();

        assert!(!batch.success);
        assert!(!batch.results[0].is_success());
        assert!(batch.results[1].is_success());
    }

    #[tokio::test]
    async fn test_state_falls_back_to_command_on_workflow_rejection() {
        let (gateway, transport) = gateway(
            tracker()
                .on(
                    Method::Post,
                    ISSUE,
                    MockReply::Status(405, r#"{"error":"Workflow rule prohibits this"}"#.into()),
                )
                .on(Method::Post, "commands", MockReply::Json(Value::Null)),
        );

        let result = gateway.update_state("DEMO-123", "in progress").await.unwrap();

        assert!(result.success);
        assert_eq!(result.via, Some(UpdatePath::Command));
        assert!(result.message.contains("command fallback"), "{}", result.message);
        assert_eq!(result.previous_value_hint.as_deref(), Some("Open"));

        let posts = transport.requests_with(Method::Post);
        assert_eq!(posts.len(), 2);
        assert_eq!(
            posts[1].body.as_ref().unwrap(),
            &json!({"query": "State \"In Progress\"", "issues": [{"idReadable": "DEMO-123"}]})
        );
    }

    #[tokio::test]
    async fn test_state_direct_path_reports_direct() {
        let (gateway, transport) =
            gateway(tracker().on(Method::Post, ISSUE, MockReply::Json(json!({}))));

        let result = gateway.update_state("DEMO-123", "Fixed").await.unwrap();

        assert_eq!(result.via, Some(UpdatePath::Direct));
        assert!(result.message.contains("direct field update"));
        assert_eq!(transport.requests_with(Method::Post).len(), 1);
    }

    #[tokio::test]
    async fn test_state_permission_error_skips_fallback() {
        let (gateway, transport) =
            gateway(tracker().on(Method::Post, ISSUE, MockReply::Status(401, String::new())));

        let error = gateway.update_state("DEMO-123", "Fixed").await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::PermissionDenied);
        assert_eq!(transport.requests_with(Method::Post).len(), 1);
    }

    #[tokio::test]
    async fn test_state_forbidden_with_workflow_wording_skips_fallback() {
        let (gateway, transport) = gateway(tracker().on(
            Method::Post,
            ISSUE,
            MockReply::Status(
                403,
                r#"{"error_description":"You are not allowed to update issue DEMO-123"}"#.into(),
            ),
        ));

        let error = gateway.update_state("DEMO-123", "Fixed").await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::PermissionDenied);
        assert_eq!(error.http_status, Some(403));
        assert_eq!(transport.requests_with(Method::Post).len(), 1);
        assert!(
            transport
                .requests_with(Method::Post)
                .iter()
                .all(|r| r.path != "commands")
        );
    }

    #[tokio::test]
    async fn test_state_both_paths_rejected() {
        let (gateway, transport) = gateway(
            tracker()
                .on(Method::Post, ISSUE, MockReply::Status(405, String::new()))
                .on(
                    Method::Post,
                    "commands",
                    MockReply::Status(400, r#"{"error":"Assignee is required before In Progress"}"#.into()),
                ),
        );

        let error = gateway.update_state("DEMO-123", "In Progress").await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::WorkflowRestricted);
        assert!(error.guidance.starts_with("Both the direct update"));
        assert!(error.summary.contains("Open → In Progress"), "{}", error.summary);
        assert_eq!(transport.requests_with(Method::Post).len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_state_is_rejected_locally() {
        let (gateway, transport) = gateway(tracker());

        let error = gateway.update_state("DEMO-123", "Reopened").await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::ValidationError);
        assert!(transport.requests_with(Method::Post).is_empty());
    }

    #[tokio::test]
    async fn test_missing_issue_is_not_found() {
        let (gateway, _) = gateway(MockTransport::new());

        let error = gateway
            .update_field("DEMO-999", "Priority", "Critical".into())
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::NotFound);
        assert!(error.summary.contains("DEMO-999"));
    }

    #[tokio::test]
    async fn test_create_issue_is_not_retried() {
        let (gateway, transport) =
            gateway(MockTransport::new().on(Method::Post, "issues", MockReply::ConnectionFailed));

        let error = gateway
            .create_issue("0-1", "Crash on start", None)
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::TransientNetwork);
        assert_eq!(transport.requests_with(Method::Post).len(), 1);
    }

    #[tokio::test]
    async fn test_create_issue_resolves_short_name() {
        let (gateway, transport) = gateway(
            MockTransport::new()
                .on(Method::Get, "admin/projects/DEMO", MockReply::Json(json!({"id": "0-1"})))
                .on(Method::Post, "issues", MockReply::Json(json!({"idReadable": "DEMO-7"}))),
        );

        let result = gateway
            .create_issue("DEMO", "Crash on start", Some("Steps..."))
            .await
            .unwrap();

        assert_eq!(result.issue_id, "DEMO-7");
        let body = transport.requests_with(Method::Post)[0].body.clone().unwrap();
        assert_eq!(body["project"]["id"], "0-1");
        assert_eq!(body["description"], "Steps...");
    }

    #[tokio::test]
    async fn test_link_uses_command_phrase() {
        let (gateway, transport) =
            gateway(MockTransport::new().on(Method::Post, "commands", MockReply::Json(Value::Null)));

        gateway.link_issues("DEMO-1", "DEMO-2", "Relates").await.unwrap();

        let body = transport.requests_with(Method::Post)[0].body.clone().unwrap();
        assert_eq!(body["query"], "relates to DEMO-2");
        assert_eq!(body["issues"][0]["idReadable"], "DEMO-1");
    }

    #[tokio::test]
    async fn test_get_issue_adds_iso_timestamps() {
        let (gateway, _) = gateway(MockTransport::new().on(
            Method::Get,
            ISSUE,
            MockReply::Json(json!({"idReadable": "DEMO-123", "created": 1_700_000_000_000_i64})),
        ));

        let issue = gateway.get_issue("DEMO-123").await.unwrap();

        assert_eq!(issue["created_iso8601"], "2023-11-14T22:13:20.000Z");
        assert!(issue.get("updated_iso8601").is_none());
    }

    #[tokio::test]
    async fn test_get_issue_fields_decodes_values() {
        let (gateway, _) = gateway(tracker());

        let fields = gateway.get_issue_fields("DEMO-123").await.unwrap();

        assert_eq!(fields["State"], FieldValue::from("Open"));
        assert_eq!(fields["Priority"], FieldValue::from("Normal"));
    }

    #[tokio::test]
    async fn test_validate_field_value_is_a_dry_run() {
        let (gateway, transport) = gateway(tracker());

        let validated = gateway
            .validate_field_value("0-1", "type", "feature".into())
            .await
            .unwrap();

        assert_eq!(validated.field.name, "Type");
        assert_eq!(validated.value, FieldValue::from("Feature"));
        assert!(transport.requests_with(Method::Post).is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_is_reported() {
        let (gateway, transport) = gateway(
            MockTransport::new().on(Method::Get, ISSUE, MockReply::RateLimited(std::time::Duration::ZERO)),
        );

        let error = gateway.get_issue("DEMO-123").await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::RateLimited);
        assert!(error.retryable);
        assert_eq!(error.issue_id.as_deref(), Some("DEMO-123"));
        assert_eq!(transport.requests().len(), 3);
    }

    #[rstest]
    #[case::path_traversal("../admin")]
    #[case::empty("")]
    #[case::query("DEMO-1?fields=x")]
    #[case::current_dir(".")]
    #[case::parent_dir("..")]
    fn test_check_id_rejects(#[case] id: &str) {
        assert!(check_id("issue", id).is_err());
    }

    #[rstest]
    #[case::readable("DEMO-123")]
    #[case::internal("2-45")]
    #[case::dotted_short_name("web.app")]
    fn test_check_id_accepts(#[case] id: &str) {
        assert!(check_id("issue", id).is_ok());
    }

    #[tokio::test]
    async fn test_dot_issue_id_sends_nothing() {
        let (gateway, transport) = gateway(tracker());

        let error = gateway.get_issue("..").await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::ValidationError);
        assert!(transport.requests().is_empty());
    }

    #[rstest]
    #[case("0-1", true)]
    #[case("81-12", true)]
    #[case("DEMO", false)]
    #[case("DEMO-1", false)]
    #[case("0-", false)]
    fn test_is_internal_id(#[case] id: &str, #[case] expected: bool) {
        assert_eq!(is_internal_id(id), expected);
    }
}
