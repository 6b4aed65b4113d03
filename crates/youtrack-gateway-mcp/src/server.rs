//! MCP server implementation.
//!
//! This module contains the main server setup using rmcp.

use crate::error::Error;
use crate::models::{
    CommentParams, CreateIssueParams, IssueParams, LinkParams, ListProjectsParams,
    ProjectFieldParams, ProjectParams, SearchParams, UpdateAssigneeParams,
    UpdateCustomFieldParams, UpdateCustomFieldsParams, UpdateEstimationParams,
    UpdatePriorityParams, UpdateStateParams, UpdateTypeParams, UserSearchParams,
    ValidateFieldParams,
};
use crate::tools::{Tools, until_cancelled};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{
    ErrorData as McpError, RoleServer, ServiceExt, handler::server::ServerHandler, tool,
    tool_handler, tool_router,
};
use serde::Serialize;
use std::sync::Arc;
use youtrack_gateway::{Gateway, GatewayConfig, OperationError};

/// Turn a gateway outcome into a tool result.
///
/// Operation failures are tool-level errors carrying the JSON envelope, so
/// the client can read `kind`, `guidance` and `suggestions`.
fn respond<T: Serialize>(
    outcome: std::result::Result<T, OperationError>,
) -> std::result::Result<CallToolResult, McpError> {
    match outcome {
        Ok(value) => Ok(CallToolResult::success(vec![Content::json(value)?])),
        Err(error) => {
            tracing::debug!(kind = %error.kind, summary = %error.summary, "Tool call failed");
            Ok(CallToolResult::error(vec![Content::json(error)?]))
        }
    }
}

/// The YouTrack MCP server.
///
/// Provides MCP protocol handling over stdio transport.
#[derive(Clone)]
pub struct YouTrackMcpServer {
    /// Tool implementations.
    tools: Arc<Tools>,
    /// Tool router for MCP dispatch.
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl YouTrackMcpServer {
    /// Set one custom field.
    #[tool(
        description = "Set any custom field on an issue. Values are plain strings, numbers, booleans, or null to clear; multiple enum values are comma-separated and durations use units like '2h 30m'."
    )]
    async fn update_custom_field(
        &self,
        Parameters(params): Parameters<UpdateCustomFieldParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.update_custom_field(&params.issue_id, &params.field_name, params.value),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// Set several custom fields.
    #[tool(
        description = "Set several custom fields on one issue, e.g. fields={\"Priority\": \"Critical\", \"Type\": \"Bug\"}. Fields are applied in order and each gets its own result; one failure does not stop the rest."
    )]
    async fn update_custom_fields(
        &self,
        Parameters(params): Parameters<UpdateCustomFieldsParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.update_custom_fields(&params.issue_id, params.fields),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// Transition an issue's state.
    #[tool(
        description = "Move an issue to another state, e.g. 'In Progress'. If a workflow rule rejects the direct update, the change is retried through the command interface; the result says which path worked."
    )]
    async fn update_issue_state(
        &self,
        Parameters(params): Parameters<UpdateStateParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.update_issue_state(&params.issue_id, &params.target_state),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// Set the priority.
    #[tool(description = "Set an issue's Priority, e.g. 'Critical'.")]
    async fn update_issue_priority(
        &self,
        Parameters(params): Parameters<UpdatePriorityParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.update_issue_priority(&params.issue_id, &params.priority),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// Set or clear the assignee.
    #[tool(description = "Assign an issue to a user by login, or omit the login to unassign.")]
    async fn update_issue_assignee(
        &self,
        Parameters(params): Parameters<UpdateAssigneeParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.update_issue_assignee(&params.issue_id, params.assignee.as_deref()),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// Set the issue type.
    #[tool(description = "Set an issue's Type, e.g. 'Bug' or 'Feature'.")]
    async fn update_issue_type(
        &self,
        Parameters(params): Parameters<UpdateTypeParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.update_issue_type(&params.issue_id, &params.issue_type),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// Set the estimation.
    #[tool(
        description = "Set an issue's Estimation from a duration such as '3d 5h' or '90m' (1d = 8h, 1w = 5d)."
    )]
    async fn update_issue_estimation(
        &self,
        Parameters(params): Parameters<UpdateEstimationParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.update_issue_estimation(&params.issue_id, &params.estimation),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// List a project's fields.
    #[tool(
        description = "List a project's custom fields with their kinds and allowed values. Use this to discover exact field names."
    )]
    async fn get_project_fields(
        &self,
        Parameters(params): Parameters<ProjectParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(self.tools.get_project_fields(&params.project_id), ctx.ct.cancelled()).await,
        )
    }

    /// Read an issue.
    #[tool(description = "Get an issue's summary, description, project, reporter, timestamps and custom fields.")]
    async fn get_issue(
        &self,
        Parameters(params): Parameters<IssueParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(until_cancelled(self.tools.get_issue(&params.issue_id), ctx.ct.cancelled()).await)
    }

    /// Read an issue's custom fields.
    #[tool(description = "Get an issue's custom field values as plain strings, numbers and booleans.")]
    async fn get_issue_custom_fields(
        &self,
        Parameters(params): Parameters<IssueParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(self.tools.get_issue_custom_fields(&params.issue_id), ctx.ct.cancelled()).await,
        )
    }

    /// Dry-run a value.
    #[tool(
        description = "Check whether a value is valid for a project's custom field without changing anything. Returns the canonical value on success."
    )]
    async fn validate_custom_field(
        &self,
        Parameters(params): Parameters<ValidateFieldParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.validate_custom_field(&params.project_id, &params.field_name, params.value),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// List allowed values.
    #[tool(description = "List the allowed values of an enum or state field in a project.")]
    async fn get_available_custom_field_values(
        &self,
        Parameters(params): Parameters<ProjectFieldParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.get_available_custom_field_values(&params.project_id, &params.field_name),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// Search issues.
    #[tool(
        description = "Search issues with the tracker's query syntax, e.g. 'project: DEMO #Unresolved assignee: me'."
    )]
    async fn search_issues(
        &self,
        Parameters(params): Parameters<SearchParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(self.tools.search_issues(&params.query, params.limit), ctx.ct.cancelled()).await,
        )
    }

    /// Create an issue.
    #[tool(description = "Create an issue in a project. Not retried automatically on failure.")]
    async fn create_issue(
        &self,
        Parameters(params): Parameters<CreateIssueParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.create_issue(
                    &params.project_id,
                    &params.summary,
                    params.description.as_deref(),
                ),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// Comment on an issue.
    #[tool(description = "Add a comment to an issue. Not retried automatically on failure.")]
    async fn add_comment(
        &self,
        Parameters(params): Parameters<CommentParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(self.tools.add_comment(&params.issue_id, &params.text), ctx.ct.cancelled()).await,
        )
    }

    /// Link two issues.
    #[tool(
        description = "Link two issues. Types: relates, depends on, is required for, duplicates, is duplicated by, parent for, subtask of."
    )]
    async fn link_issues(
        &self,
        Parameters(params): Parameters<LinkParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.link_issues(
                    &params.source_issue_id,
                    &params.target_issue_id,
                    &params.link_type,
                ),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// List projects.
    #[tool(
        description = "List projects with their short names, which prefix issue IDs. Archived projects are hidden unless include_archived is true."
    )]
    async fn get_projects(
        &self,
        Parameters(params): Parameters<ListProjectsParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.get_projects(params.include_archived),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// Read a project.
    #[tool(description = "Get one project by short name, e.g. 'DEMO'.")]
    async fn get_project(
        &self,
        Parameters(params): Parameters<ProjectParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(until_cancelled(self.tools.get_project(&params.project_id), ctx.ct.cancelled()).await)
    }

    /// Read comments.
    #[tool(description = "List an issue's comments with authors and timestamps, oldest first.")]
    async fn get_issue_comments(
        &self,
        Parameters(params): Parameters<IssueParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.get_issue_comments(&params.issue_id),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// Read links.
    #[tool(description = "List an issue's links by type and direction, with the linked issues.")]
    async fn get_issue_links(
        &self,
        Parameters(params): Parameters<IssueParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(self.tools.get_issue_links(&params.issue_id), ctx.ct.cancelled())
                .await,
        )
    }

    /// List link types.
    #[tool(description = "List the link types the tracker defines, with their inward and outward names.")]
    async fn get_available_link_types(
        &self,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(until_cancelled(self.tools.get_available_link_types(), ctx.ct.cancelled()).await)
    }

    /// List attachments.
    #[tool(description = "List an issue's attachments: name, MIME type, size and download URL.")]
    async fn get_issue_attachments(
        &self,
        Parameters(params): Parameters<IssueParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.get_issue_attachments(&params.issue_id),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// Who am I.
    #[tool(description = "Get the user the configured token belongs to.")]
    async fn get_current_user(
        &self,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(until_cancelled(self.tools.get_current_user(), ctx.ct.cancelled()).await)
    }

    /// Find users.
    #[tool(description = "Find users by part of their login, name or email. Use the login with update_issue_assignee.")]
    async fn search_users(
        &self,
        Parameters(params): Parameters<UserSearchParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.search_users(&params.query, params.limit),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }

    /// Explain workflow restrictions.
    #[tool(
        description = "Explain what may block an issue's next state change: current state, valid states, transitions a state machine offers, a missing assignee and empty fields. Reads only."
    )]
    async fn diagnose_workflow_restrictions(
        &self,
        Parameters(params): Parameters<IssueParams>,
        ctx: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        respond(
            until_cancelled(
                self.tools.diagnose_workflow_restrictions(&params.issue_id),
                ctx.ct.cancelled(),
            )
            .await,
        )
    }
}

impl YouTrackMcpServer {
    /// Create a server over an existing gateway.
    #[must_use]
    pub fn new(gateway: Gateway) -> Self {
        Self {
            tools: Arc::new(Tools::new(gateway)),
            tool_router: Self::tool_router(),
        }
    }

    /// Create a server over HTTP from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is incomplete or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &GatewayConfig) -> crate::error::Result<Self> {
        Ok(Self::new(Gateway::connect(config)?))
    }

    /// Get a reference to the tool implementations.
    #[must_use]
    pub fn tools(&self) -> &Arc<Tools> {
        &self.tools
    }

    /// Serve over stdio until the client disconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if the MCP session fails to start or ends abnormally.
    pub async fn run(self) -> crate::error::Result<()> {
        let service = self
            .serve(rmcp::transport::stdio())
            .await
            .map_err(|e| Error::Mcp(e.to_string()))?;
        tracing::info!("MCP session established");
        service
            .waiting()
            .await
            .map_err(|e| Error::Mcp(e.to_string()))?;
        tracing::info!("MCP session closed");
        Ok(())
    }
}

#[tool_handler]
impl ServerHandler for YouTrackMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "youtrack-gateway-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "YouTrack issue operations. Use get_project_fields to discover field names and allowed values before updating, and diagnose_workflow_restrictions when a state change is rejected. Failed calls return an error payload with kind, guidance and suggestions."
                    .into(),
            ),
        }
    }
}
