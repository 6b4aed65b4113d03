//! MCP server for YouTrack issue operations.
//!
//! This crate exposes the [`youtrack_gateway`] operations as MCP tools so an
//! assistant can read and change issues without knowing the tracker's typed
//! custom-field wire format.
//!
//! # Architecture
//!
//! The server uses the `rmcp` crate for MCP protocol handling. Parameters are
//! deserialized (with their aliases) in [`models`], normalized in [`tools`],
//! and handed to a [`Gateway`](youtrack_gateway::Gateway). Failed operations
//! come back as tool error results carrying the gateway's error envelope.
//! Every call races the client's cancellation; a cancelled call reports a
//! retryable `TransientNetwork` error.
//!
//! # Tools
//!
//! ## Field Updates
//! - `update_custom_field` - Set any custom field
//! - `update_custom_fields` - Set several fields with itemized results
//! - `update_issue_state` - Change state, falling back to a command on workflow rejection
//! - `update_issue_priority`, `update_issue_assignee`, `update_issue_type`,
//!   `update_issue_estimation` - Shortcuts for common fields
//!
//! ## Reads
//! - `get_issue` - Issue details with ISO-8601 timestamps
//! - `get_issue_custom_fields` - Flat custom field values
//! - `get_project_fields` - A project's field schema
//! - `get_available_custom_field_values` - Allowed values of one field
//! - `validate_custom_field` - Dry-run a value against the schema
//! - `search_issues` - Query issues
//! - `get_projects`, `get_project` - Projects and their short names
//! - `get_issue_comments`, `get_issue_links`, `get_issue_attachments` - Issue context
//! - `get_available_link_types` - Link types the tracker defines
//! - `get_current_user`, `search_users` - User lookup
//! - `diagnose_workflow_restrictions` - What may block a state change
//!
//! ## Issue Management
//! - `create_issue` - Create an issue
//! - `add_comment` - Comment on an issue
//! - `link_issues` - Link two issues

pub mod error;
pub mod models;
pub mod server;
pub mod tools;

pub use error::{Error, Result};
pub use server::YouTrackMcpServer;
