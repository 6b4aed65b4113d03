//! Read-only lookups around issues: projects, users, links, comments,
//! attachments and workflow diagnosis.
//!
//! These never change tracker state, so every call here is retried under the
//! idempotent policy.

use crate::classify::{ClassifyContext, ErrorKind, OperationError};
use crate::diagnose::{DIAGNOSIS_FIELDS_SELECTOR, WorkflowDiagnosis};
use crate::orchestrator::{Gateway, add_iso_timestamps, check_id, project_error};
use crate::retry::Idempotency;
use crate::transport::ApiRequest;
use serde_json::Value;
use tracing::debug;

const PROJECT_SELECTOR: &str = "id,name,shortName,description,archived,leader(login,fullName)";

const USER_SELECTOR: &str = "id,login,fullName,email,guest,online,banned";

const COMMENT_SELECTOR: &str = "id,text,created,updated,author(login,fullName)";

const LINK_SELECTOR: &str =
    "id,direction,linkType(name,sourceToTarget,targetToSource,directed),issues(idReadable,summary)";

const LINK_TYPE_SELECTOR: &str = "id,name,sourceToTarget,targetToSource,directed";

const ATTACHMENT_SELECTOR: &str = "id,name,mimeType,size,created,url,author(login)";

impl Gateway {
    async fn read(&self, request: ApiRequest, context: &ClassifyContext) -> Result<Value, OperationError> {
        self.call(request, Idempotency::Idempotent, context).await
    }

    /// Projects visible to the token's user; archived ones only on request.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the read.
    pub async fn get_projects(&self, include_archived: bool) -> Result<Value, OperationError> {
        let request = ApiRequest::get("admin/projects")
            .fields(PROJECT_SELECTOR)
            .query("$top", "-1");
        let mut body = self.read(request, &ClassifyContext::default()).await?;
        if !include_archived && let Value::Array(projects) = &mut body {
            projects.retain(|p| !p.get("archived").and_then(Value::as_bool).unwrap_or(false));
        }
        debug!(count = body.as_array().map_or(0, Vec::len), "Listed projects");
        Ok(body)
    }

    /// One project by short name or internal ID.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` naming the project, or the classified failure.
    pub async fn get_project(&self, project_id: &str) -> Result<Value, OperationError> {
        check_id("project", project_id)?;
        let request = ApiRequest::get(format!("admin/projects/{project_id}")).fields(PROJECT_SELECTOR);
        self.read(request, &ClassifyContext::default())
            .await
            .map_err(|e| project_error(e, project_id))
    }

    /// Comments on an issue, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the read.
    pub async fn get_issue_comments(&self, issue_id: &str) -> Result<Value, OperationError> {
        check_id("issue", issue_id)?;
        let request = ApiRequest::get(format!("issues/{issue_id}/comments"))
            .fields(COMMENT_SELECTOR)
            .query("$top", "-1");
        let mut body = self.read(request, &ClassifyContext::issue(issue_id)).await?;
        if let Value::Array(comments) = &mut body {
            comments.iter_mut().for_each(add_iso_timestamps);
        }
        Ok(body)
    }

    /// Links of an issue, grouped by link type and direction.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the read.
    pub async fn get_issue_links(&self, issue_id: &str) -> Result<Value, OperationError> {
        check_id("issue", issue_id)?;
        let request = ApiRequest::get(format!("issues/{issue_id}/links")).fields(LINK_SELECTOR);
        self.read(request, &ClassifyContext::issue(issue_id)).await
    }

    /// Link types defined on the tracker.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the read.
    pub async fn get_available_link_types(&self) -> Result<Value, OperationError> {
        let request = ApiRequest::get("issueLinkTypes").fields(LINK_TYPE_SELECTOR);
        self.read(request, &ClassifyContext::default()).await
    }

    /// Attachment metadata of an issue. Contents are not downloaded.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the read.
    pub async fn get_issue_attachments(&self, issue_id: &str) -> Result<Value, OperationError> {
        check_id("issue", issue_id)?;
        let request =
            ApiRequest::get(format!("issues/{issue_id}/attachments")).fields(ATTACHMENT_SELECTOR);
        let mut body = self.read(request, &ClassifyContext::issue(issue_id)).await?;
        if let Value::Array(attachments) = &mut body {
            attachments.iter_mut().for_each(add_iso_timestamps);
        }
        Ok(body)
    }

    /// The user the token belongs to.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the read.
    pub async fn get_current_user(&self) -> Result<Value, OperationError> {
        let request = ApiRequest::get("users/me").fields(USER_SELECTOR);
        self.read(request, &ClassifyContext::default()).await
    }

    /// Users whose login, name or email match `query`.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for an empty query, or the classified
    /// failure of the read.
    pub async fn search_users(&self, query: &str, limit: u32) -> Result<Value, OperationError> {
        if query.trim().is_empty() {
            return Err(OperationError::validation("query", "User query must not be empty")
                .with_suggestion("Pass part of a login, name or email"));
        }
        let request = ApiRequest::get("users")
            .query("query", query.trim())
            .query("$top", limit.max(1).to_string())
            .fields(USER_SELECTOR);
        self.read(request, &ClassifyContext::default()).await
    }

    /// Explain what may block the issue's next state change.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` when the issue has no state field, or the
    /// classified failure of any read.
    pub async fn diagnose_workflow_restrictions(
        &self,
        issue_id: &str,
    ) -> Result<WorkflowDiagnosis, OperationError> {
        check_id("issue", issue_id)?;
        let (_, schema) = self.issue_context(issue_id).await?;
        let request = ApiRequest::get(format!("issues/{issue_id}/customFields"))
            .fields(DIAGNOSIS_FIELDS_SELECTOR);
        let fields = self.read(request, &ClassifyContext::issue(issue_id)).await?;

        let diagnosis = WorkflowDiagnosis::analyze(issue_id, &fields, &schema).ok_or_else(|| {
            OperationError::new(ErrorKind::ValidationError, "This issue has no state field")
                .with_issue(issue_id)
                .with_suggestion(format!("Available fields: {}", schema.names().join(", ")))
        })?;
        debug!(
            issue = issue_id,
            state_machine = diagnosis.state_machine,
            transitions = diagnosis.transitions.len(),
            "Workflow diagnosed"
        );
        Ok(diagnosis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::transport::{Method, MockReply, MockTransport};
    use serde_json::json;
    use std::sync::Arc;

    fn gateway(transport: MockTransport) -> (Gateway, Arc<MockTransport>) {
        let transport = Arc::new(transport);
        let gateway = Gateway::new(transport.clone(), RetryPolicy::immediate(2));
        (gateway, transport)
    }

    fn query_value<'a>(request: &'a ApiRequest, key: &str) -> Option<&'a str> {
        request
            .query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn test_get_projects_hides_archived() {
        let (gateway, transport) = gateway(MockTransport::new().on(
            Method::Get,
            "admin/projects",
            MockReply::Json(json!([
                {"id": "0-1", "shortName": "DEMO", "archived": false},
                {"id": "0-2", "shortName": "OLD", "archived": true}
            ])),
        ));

        let active = gateway.get_projects(false).await.unwrap();
        let all = gateway.get_projects(true).await.unwrap();

        assert_eq!(active.as_array().unwrap().len(), 1);
        assert_eq!(active[0]["shortName"], "DEMO");
        assert_eq!(all.as_array().unwrap().len(), 2);
        assert_eq!(query_value(&transport.requests()[0], "$top"), Some("-1"));
    }

    #[tokio::test]
    async fn test_get_project_not_found_names_project() {
        let (gateway, _) = gateway(MockTransport::new());

        let error = gateway.get_project("NOPE").await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::NotFound);
        assert!(error.summary.contains("NOPE"));
        assert!(!error.retryable);
    }

    #[tokio::test]
    async fn test_get_issue_links_requests_link_types() {
        let (gateway, transport) = gateway(MockTransport::new().on(
            Method::Get,
            "issues/DEMO-1/links",
            MockReply::Json(json!([
                {"direction": "OUTWARD", "linkType": {"name": "Depend"}, "issues": [{"idReadable": "DEMO-2"}]}
            ])),
        ));

        let links = gateway.get_issue_links("DEMO-1").await.unwrap();

        assert_eq!(links[0]["issues"][0]["idReadable"], "DEMO-2");
        let requests = transport.requests();
        let fields = query_value(&requests[0], "fields").unwrap();
        assert!(fields.contains("linkType(name"));
        assert!(fields.contains("direction"));
    }

    #[tokio::test]
    async fn test_get_issue_comments_adds_iso_timestamps() {
        let (gateway, _) = gateway(MockTransport::new().on(
            Method::Get,
            "issues/DEMO-1/comments",
            MockReply::Json(json!([{"id": "4-1", "text": "Looks good", "created": 0}])),
        ));

        let comments = gateway.get_issue_comments("DEMO-1").await.unwrap();

        assert_eq!(comments[0]["created_iso8601"], "1970-01-01T00:00:00.000Z");
    }

    #[tokio::test]
    async fn test_get_current_user_survives_transient_failure() {
        let (gateway, transport) = gateway(
            MockTransport::new()
                .on(Method::Get, "users/me", MockReply::ConnectionFailed)
                .on(Method::Get, "users/me", MockReply::Json(json!({"login": "jane"}))),
        );

        let user = gateway.get_current_user().await.unwrap();

        assert_eq!(user["login"], "jane");
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_search_users_passes_query_and_limit() {
        let (gateway, transport) = gateway(MockTransport::new().on(
            Method::Get,
            "users",
            MockReply::Json(json!([{"login": "jane.doe"}])),
        ));

        gateway.search_users(" jane ", 5).await.unwrap();

        let request = &transport.requests()[0];
        assert_eq!(query_value(request, "query"), Some("jane"));
        assert_eq!(query_value(request, "$top"), Some("5"));
    }

    #[tokio::test]
    async fn test_search_users_rejects_empty_query() {
        let (gateway, transport) = gateway(MockTransport::new());

        let error = gateway.search_users("  ", 10).await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::ValidationError);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_diagnose_reads_events_and_schema() {
        let (gateway, transport) = gateway(
            MockTransport::new()
                .on(
                    Method::Get,
                    "issues/DEMO-1",
                    MockReply::Json(json!({"idReadable": "DEMO-1", "project": {"id": "0-1"}})),
                )
                .on(
                    Method::Get,
                    "admin/projects/0-1/customFields",
                    MockReply::Json(json!([{
                        "field": {"name": "State", "fieldType": {"valueType": "state[1]"}},
                        "bundle": {"values": [{"name": "Open"}, {"name": "In Progress"}]}
                    }])),
                )
                .on(
                    Method::Get,
                    "issues/DEMO-1/customFields",
                    MockReply::Json(json!([
                        {
                            "name": "State",
                            "$type": "StateIssueCustomField",
                            "value": {"name": "Open"},
                            "possibleEvents": []
                        },
                        {"name": "Assignee", "$type": "SingleUserIssueCustomField", "value": null}
                    ])),
                ),
        );

        let diagnosis = gateway.diagnose_workflow_restrictions("DEMO-1").await.unwrap();

        assert_eq!(diagnosis.current_state.as_deref(), Some("Open"));
        assert_eq!(diagnosis.available_states, vec!["Open", "In Progress"]);
        assert_eq!(diagnosis.assignee_set, Some(false));
        assert!(transport.requests_with(Method::Post).is_empty());
    }

    #[tokio::test]
    async fn test_diagnose_unknown_issue_is_not_found() {
        let (gateway, _) = gateway(MockTransport::new());

        let error = gateway.diagnose_workflow_restrictions("DEMO-404").await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::NotFound);
        assert_eq!(error.issue_id.as_deref(), Some("DEMO-404"));
    }
}
