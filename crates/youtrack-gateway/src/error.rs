//! Error types for the gateway core.
//!
//! Two families live here:
//!
//! - [`TransportFailure`]: what a single HTTP exchange with the tracker can
//!   produce. These never cross the gateway boundary; the orchestrator turns
//!   them into [`OperationError`](crate::OperationError) envelopes.
//! - [`Error`]: setup failures (configuration, client construction) that
//!   happen before any operation runs.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single request against the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFailure {
    /// DNS, connect, TLS, or timeout failure. Retryable.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        /// Description of the underlying network failure.
        message: String,
    },

    /// The tracker answered with a 4xx/5xx status.
    #[error("request failed with HTTP status {status}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Response body as text (may be empty).
        body: String,
        /// Server-supplied `Retry-After` delay, if any.
        retry_after: Option<Duration>,
    },

    /// A successful status carried a body that is not valid JSON.
    #[error("malformed response: {message}")]
    MalformedResponse {
        /// What failed to parse.
        message: String,
    },
}

impl TransportFailure {
    /// Create an HTTP error without a `Retry-After` hint.
    #[must_use]
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::HttpError {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    /// Create a connection failure.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    /// HTTP status, when the failure came from a response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Setup errors for the gateway.
#[derive(Debug, Error)]
pub enum Error {
    /// A required setting is missing or empty.
    #[error("Missing configuration: {name}. {hint}")]
    MissingSetting {
        /// Setting name (environment variable or config key).
        name: &'static str,
        /// How to provide it.
        hint: &'static str,
    },

    /// A setting is present but unusable.
    #[error("Invalid configuration value for {name}: '{value}'")]
    InvalidSetting {
        /// Setting name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },

    /// An I/O error while reading configuration or token files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The YAML configuration file could not be parsed.
    #[error("Config file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result type for gateway setup.
pub type Result<T> = std::result::Result<T, Error>;
