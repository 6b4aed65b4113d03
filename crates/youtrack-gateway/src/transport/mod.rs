//! Transport abstraction for the YouTrack REST API.
//!
//! The [`Transport`] trait is the seam between decision logic and the network.
//! [`HttpTransport`] is the production implementation over `reqwest`;
//! [`MockTransport`] (behind the `test-util` feature) replays scripted replies
//! and records every request it sees.
//!
//! Implementations classify raw failures into [`TransportFailure`] and never
//! retry on their own; retries belong to [`crate::retry`].

use crate::error::TransportFailure;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

pub mod http;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use http::HttpTransport;

#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockReply, MockTransport};

/// HTTP methods used against the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read.
    Get,
    /// Create or update.
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
        };
        write!(f, "{name}")
    }
}

/// A request relative to the API root.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path below the API root, without a leading slash (e.g. `issues/DEMO-1`).
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Create a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Create a POST request with a JSON body.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    /// Add a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Request specific response fields (the tracker's `fields` parameter).
    #[must_use]
    pub fn fields(self, fields: &str) -> Self {
        self.query("fields", fields)
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body; `Value::Null` for empty bodies.
    pub body: Value,
}

/// Sends requests to the tracker.
///
/// Implementations must be safe for concurrent use by independent operations.
/// Non-2xx responses are returned as [`TransportFailure::HttpError`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return the parsed response.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builders_set_method() {
        let read = ApiRequest::get("issues/DEMO-1").fields("idReadable");
        assert_eq!(read.method.to_string(), "GET");
        assert_eq!(read.query, vec![("fields".to_string(), "idReadable".to_string())]);
        assert!(read.body.is_none());

        let write = ApiRequest::post("commands", json!({"query": "State Fixed"}));
        assert_eq!(write.method.to_string(), "POST");
        assert_eq!(write.body, Some(json!({"query": "State Fixed"})));
    }
}
