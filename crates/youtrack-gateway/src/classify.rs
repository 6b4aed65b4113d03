//! Failure classification.
//!
//! Turns an HTTP failure (status + body) into an [`OperationError`] with a
//! short summary and remediation suggestions. Classification is a prioritized
//! list of [`ClassifierRule`]s: the first rule whose status and body pattern
//! both match decides the [`ErrorKind`]. Callers can prepend their own rules
//! for tracker-specific phrasing via [`Classifier::with_rule`].
//!
//! The classifier holds no mutable state; the same inputs always produce the
//! same error.

use crate::error::TransportFailure;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::LazyLock;
use thiserror::Error;

/// Maximum characters of a response body echoed back in an error.
pub const BODY_EXCERPT_LIMIT: usize = 200;

/// Category of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The value cannot be encoded or the tracker rejected it as invalid.
    ValidationError,
    /// The issue, project, or field does not exist.
    NotFound,
    /// Authentication failed or the token lacks permission.
    PermissionDenied,
    /// A workflow rule rejected the change.
    WorkflowRestricted,
    /// Rate limited, after the retry budget ran out.
    RateLimited,
    /// Network or server failure, after the retry budget ran out.
    TransientNetwork,
    /// Anything unrecognized.
    Unknown,
}

impl ErrorKind {
    /// Whether a caller may reasonably retry later.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::TransientNetwork)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ValidationError => "ValidationError",
            Self::NotFound => "NotFound",
            Self::PermissionDenied => "PermissionDenied",
            Self::WorkflowRestricted => "WorkflowRestricted",
            Self::RateLimited => "RateLimited",
            Self::TransientNetwork => "TransientNetwork",
            Self::Unknown => "Unknown",
        };
        write!(f, "{name}")
    }
}

/// Uniform failure envelope returned to the tool layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {summary}")]
pub struct OperationError {
    /// Failure category.
    pub kind: ErrorKind,
    /// HTTP status, when the failure came from a response.
    pub http_status: Option<u16>,
    /// Issue the operation targeted.
    pub issue_id: Option<String>,
    /// Field the operation targeted.
    pub field: Option<String>,
    /// One-line description of what went wrong.
    pub summary: String,
    /// Explanation and diagnostic detail.
    pub guidance: String,
    /// Concrete remediation steps.
    pub suggestions: Vec<String>,
    /// Whether retrying later may succeed.
    pub retryable: bool,
}

impl OperationError {
    /// Create an error of `kind`; `retryable` follows the kind.
    pub fn new(kind: ErrorKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            http_status: None,
            issue_id: None,
            field: None,
            summary: summary.into(),
            guidance: String::new(),
            suggestions: Vec::new(),
            retryable: kind.is_retryable(),
        }
    }

    /// A value that failed local encoding; never sent over the wire.
    pub fn validation(field: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, summary).with_field(field)
    }

    /// Set the HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Set the target issue.
    #[must_use]
    pub fn with_issue(mut self, issue_id: impl Into<String>) -> Self {
        self.issue_id = Some(issue_id.into());
        self
    }

    /// Set the target field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Set the guidance text.
    #[must_use]
    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = guidance.into();
        self
    }

    /// Append a remediation suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Fill in issue and field from `context` where not already set.
    #[must_use]
    pub fn in_context(mut self, context: &ClassifyContext) -> Self {
        if self.issue_id.is_none() {
            self.issue_id.clone_from(&context.issue_id);
        }
        if self.field.is_none() {
            self.field.clone_from(&context.field_name);
        }
        self
    }
}

/// What the failed call was trying to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifyContext {
    /// Target issue.
    pub issue_id: Option<String>,
    /// Target field.
    pub field_name: Option<String>,
    /// Value the caller asked for.
    pub target_value: Option<String>,
    /// Value before the change, if known.
    pub current_value: Option<String>,
}

impl ClassifyContext {
    /// Context for a call on `issue_id` with no field.
    pub fn issue(issue_id: impl Into<String>) -> Self {
        Self {
            issue_id: Some(issue_id.into()),
            ..Self::default()
        }
    }

    /// Context for setting `field_name` on `issue_id` to `target_value`.
    pub fn field(
        issue_id: impl Into<String>,
        field_name: impl Into<String>,
        target_value: impl Into<String>,
    ) -> Self {
        Self {
            issue_id: Some(issue_id.into()),
            field_name: Some(field_name.into()),
            target_value: Some(target_value.into()),
            current_value: None,
        }
    }

    /// Record the value before the change.
    #[must_use]
    pub fn with_current(mut self, current: Option<String>) -> Self {
        self.current_value = current;
        self
    }
}

/// Which statuses a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMatch {
    /// Exactly this status.
    Exact(u16),
    /// Any of these statuses.
    OneOf(Vec<u16>),
    /// Any status in the range.
    Range(RangeInclusive<u16>),
}

impl StatusMatch {
    fn matches(&self, status: u16) -> bool {
        match self {
            Self::Exact(s) => *s == status,
            Self::OneOf(list) => list.contains(&status),
            Self::Range(range) => range.contains(&status),
        }
    }
}

/// One status/body pattern mapped to a kind.
#[derive(Debug, Clone)]
pub struct ClassifierRule {
    /// Statuses the rule applies to.
    pub status: StatusMatch,
    /// Body pattern that must also match, if any.
    pub pattern: Option<Regex>,
    /// Kind assigned when the rule matches.
    pub kind: ErrorKind,
}

impl ClassifierRule {
    /// A rule that matches on status alone.
    #[must_use]
    pub fn status(status: StatusMatch, kind: ErrorKind) -> Self {
        Self {
            status,
            pattern: None,
            kind,
        }
    }

    /// A rule that matches on status and body pattern.
    #[must_use]
    pub fn body(status: StatusMatch, pattern: Regex, kind: ErrorKind) -> Self {
        Self {
            status,
            pattern: Some(pattern),
            kind,
        }
    }

    fn matches(&self, status: u16, body: &str) -> bool {
        self.status.matches(status) && self.pattern.as_ref().is_none_or(|p| p.is_match(body))
    }
}

static WORKFLOW_PHRASES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)workflow|transition|state machine|not allowed|is prohibited|not permitted|cannot be (?:changed|set|moved)|(?:must|should) be set|required before|guard",
    )
    .expect("workflow pattern is valid")
});

static UNKNOWN_FIELD_PHRASES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:unknown|no such|cannot find|can't find|could not find)\s+(?:custom\s+)?field|field\b.{0,80}\b(?:not found|does not exist|doesn't exist|is not attached)|incompatible-issue-custom-field-name",
    )
    .expect("unknown field pattern is valid")
});

static INVALID_VALUE_PHRASES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)invalid|incompatible|cannot parse|can't parse|bad value|is not a valid|unexpected value")
        .expect("invalid value pattern is valid")
});

const STATE_WORDS: &str = r"[A-Z][\w'-]*(?:\s[A-Z][\w'-]*)*";

static FROM_TO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?i:from)\s+["'“]?(?P<from>{STATE_WORDS})["'”]?\s+(?i:to)\s+["'“]?(?P<to>{STATE_WORDS})"#
    ))
    .expect("transition pattern is valid")
});

static ARROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"["'“]?(?P<from>{STATE_WORDS})["'”]?\s*(?:→|->|=>)\s*["'“]?(?P<to>{STATE_WORDS})"#
    ))
    .expect("arrow pattern is valid")
});

static SECRETS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)bearer\s+[^\s"',]+|perm[:-][A-Za-z0-9._=+/-]+"#).expect("secret pattern is valid")
});

/// Prioritized, extensible failure classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassifierRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(builtin_rules())
    }
}

/// The built-in rules, highest priority first.
#[must_use]
pub fn builtin_rules() -> Vec<ClassifierRule> {
    use ErrorKind::{
        NotFound, PermissionDenied, RateLimited, TransientNetwork, ValidationError,
        WorkflowRestricted,
    };
    vec![
        ClassifierRule::status(StatusMatch::Exact(429), RateLimited),
        ClassifierRule::status(StatusMatch::Exact(404), NotFound),
        ClassifierRule::status(StatusMatch::Exact(405), WorkflowRestricted),
        ClassifierRule::body(
            StatusMatch::Exact(400),
            WORKFLOW_PHRASES.clone(),
            WorkflowRestricted,
        ),
        ClassifierRule::body(
            StatusMatch::Exact(400),
            UNKNOWN_FIELD_PHRASES.clone(),
            ValidationError,
        ),
        ClassifierRule::body(
            StatusMatch::OneOf(vec![400, 422]),
            INVALID_VALUE_PHRASES.clone(),
            ValidationError,
        ),
        ClassifierRule::status(StatusMatch::OneOf(vec![401, 403]), PermissionDenied),
        ClassifierRule::status(StatusMatch::Range(500..=599), TransientNetwork),
    ]
}

impl Classifier {
    /// Create a classifier from an explicit rule list.
    #[must_use]
    pub fn new(rules: Vec<ClassifierRule>) -> Self {
        Self { rules }
    }

    /// Add a rule ahead of all existing ones.
    #[must_use]
    pub fn with_rule(mut self, rule: ClassifierRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// The active rules, highest priority first.
    #[must_use]
    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    /// Classify any transport failure.
    #[must_use]
    pub fn classify_failure(
        &self,
        failure: &TransportFailure,
        context: &ClassifyContext,
    ) -> OperationError {
        match failure {
            TransportFailure::HttpError { status, body, .. } => {
                self.classify(*status, body, context)
            }
            TransportFailure::ConnectionFailed { message } => {
                OperationError::new(ErrorKind::TransientNetwork, "Could not reach the tracker")
                    .with_guidance(message.clone())
                    .with_suggestion("Check the tracker URL and network connectivity, then retry")
                    .in_context(context)
            }
            TransportFailure::MalformedResponse { message } => OperationError::new(
                ErrorKind::Unknown,
                "The tracker returned a response that is not JSON",
            )
            .with_guidance(message.clone())
            .with_suggestion("Check that the configured URL points at the tracker's REST API")
            .in_context(context),
        }
    }

    /// Classify an HTTP failure from its status and body.
    #[must_use]
    pub fn classify(&self, status: u16, body: &str, context: &ClassifyContext) -> OperationError {
        let message = error_message(body);
        let kind = self
            .rules
            .iter()
            .find(|rule| rule.matches(status, body) || rule.matches(status, &message))
            .map_or(ErrorKind::Unknown, |rule| rule.kind);

        let error = match kind {
            ErrorKind::WorkflowRestricted => workflow_error(&message, context),
            ErrorKind::ValidationError => validation_error(&message, context),
            ErrorKind::NotFound => not_found_error(context),
            ErrorKind::PermissionDenied => permission_error(status, context),
            ErrorKind::RateLimited => OperationError::new(kind, "The tracker is rate limiting requests")
                .with_suggestion("Wait a few seconds before retrying"),
            ErrorKind::TransientNetwork => {
                OperationError::new(kind, format!("The tracker failed with HTTP {status}"))
                    .with_guidance(excerpt(body))
                    .with_suggestion("Retry later; the tracker may be restarting or overloaded")
            }
            ErrorKind::Unknown => OperationError::new(
                kind,
                format!("Unexpected response from the tracker (HTTP {status})"),
            )
            .with_guidance(format!("HTTP {status}: {}", excerpt(body))),
        };

        error.with_status(status).in_context(context)
    }
}

fn workflow_error(message: &str, context: &ClassifyContext) -> OperationError {
    let (from, to) = transition(message, context);
    let transition = format!("{from} → {to}");
    let field = context.field_name.as_deref().unwrap_or("State");

    let precondition = if message.to_lowercase().contains("assignee") || to.eq_ignore_ascii_case("In Progress") {
        format!("The target state may require a precondition: for example an assignee must be set before moving to '{to}'")
    } else {
        format!("The target state '{to}' may require a precondition (such as a required field) to be met first")
    };

    let command = if to.contains(' ') {
        format!("{field} \"{to}\"")
    } else {
        format!("{field} {to}")
    };

    OperationError::new(
        ErrorKind::WorkflowRestricted,
        format!("Workflow rejected the transition {transition}"),
    )
    .with_guidance(format!(
        "The project's workflow does not allow {transition} under the issue's current conditions. Tracker said: {}",
        excerpt(message)
    ))
    .with_suggestion(precondition)
    .with_suggestion(format!(
        "Retry through the command interface (`{command}`) instead of the direct field update"
    ))
}

fn validation_error(message: &str, context: &ClassifyContext) -> OperationError {
    let field = context.field_name.as_deref().unwrap_or("field");
    if UNKNOWN_FIELD_PHRASES.is_match(message) {
        return OperationError::new(
            ErrorKind::ValidationError,
            format!("Field '{field}' does not exist on this issue's project"),
        )
        .with_guidance(excerpt(message))
        .with_suggestion("List the project's fields and use one of the exact names");
    }

    let value = context.target_value.as_deref().unwrap_or_default();
    OperationError::new(
        ErrorKind::ValidationError,
        format!("The tracker rejected value '{value}' for field '{field}'"),
    )
    .with_guidance(excerpt(message))
    .with_suggestion("List the field's allowed values and retry with one of them")
}

fn not_found_error(context: &ClassifyContext) -> OperationError {
    let summary = match &context.issue_id {
        Some(id) => format!("Issue '{id}' was not found"),
        None => "The requested resource was not found".to_string(),
    };
    OperationError::new(ErrorKind::NotFound, summary)
        .with_suggestion("Check the ID format (e.g. DEMO-123) and that it exists")
        .with_suggestion("Verify the token's user can see the project")
}

fn permission_error(status: u16, context: &ClassifyContext) -> OperationError {
    if status == 401 {
        return OperationError::new(ErrorKind::PermissionDenied, "Authentication failed")
            .with_suggestion("Check that the API token is valid and has not expired");
    }
    let target = context.field_name.as_deref().map_or_else(
        || "this operation".to_string(),
        |f| format!("changing '{f}'"),
    );
    OperationError::new(
        ErrorKind::PermissionDenied,
        format!("Permission denied for {target}"),
    )
    .with_suggestion("Ask a project administrator to grant the token's user the required permission")
}

/// Pull the human-readable message out of a tracker error body.
fn error_message(body: &str) -> String {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    for key in ["error_description", "error", "message", "value"] {
        if let Some(Value::String(text)) = map.get(key)
            && !text.is_empty()
        {
            return text.clone();
        }
    }
    body.trim().to_string()
}

/// The attempted transition, from the body if it names one, else from context.
fn transition(message: &str, context: &ClassifyContext) -> (String, String) {
    let parsed = FROM_TO
        .captures(message)
        .or_else(|| ARROW.captures(message))
        .map(|c| (c["from"].to_string(), c["to"].to_string()));

    let from = parsed
        .as_ref()
        .map(|(f, _)| f.clone())
        .or_else(|| context.current_value.clone())
        .unwrap_or_else(|| "current state".to_string());
    let to = context
        .target_value
        .clone()
        .or_else(|| parsed.map(|(_, t)| t))
        .unwrap_or_else(|| "target state".to_string());
    (from, to)
}

/// Truncated, secret-free excerpt of a response body.
#[must_use]
pub fn excerpt(body: &str) -> String {
    let redacted = SECRETS.replace_all(body, "[redacted]");
    let collapsed = redacted.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= BODY_EXCERPT_LIMIT {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(BODY_EXCERPT_LIMIT).collect();
    format!("{cut}…")
}
