//! `reqwest`-backed transport.

use super::{ApiRequest, ApiResponse, Method, Transport};
use crate::config::GatewayConfig;
use crate::error::{Result, TransportFailure};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Authenticated HTTP client for one YouTrack instance.
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    api_root: String,
}

impl HttpTransport {
    /// Build a transport from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the token or URL cannot be resolved, the token is
    /// not a valid header value, or the HTTP client fails to build.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let token = config.resolve_token()?;
        let api_root = config.api_root()?;
        Self::with_parts(&api_root, &token, config.verify_ssl, config.timeout())
    }

    /// Build a transport from explicit parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not a valid header value or the client fails to build.
    pub fn with_parts(
        api_root: &str,
        token: &str,
        verify_ssl: bool,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim())).map_err(|_| {
            crate::error::Error::InvalidSetting {
                name: "YOUTRACK_API_TOKEN",
                value: "[redacted]".to_string(),
            }
        })?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        if !verify_ssl {
            warn!("TLS certificate verification is disabled");
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!verify_ssl)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        let api_root = api_root.trim_end_matches('/').to_string();
        debug!(api_root = %api_root, "HTTP transport initialized");

        Ok(Self { client, api_root })
    }

    /// The API root every request path is joined to.
    #[must_use]
    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_root, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, TransportFailure> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            debug!(method = %request.method, path = %request.path, body = %body, "Request body");
            builder = builder.json(body);
        }

        debug!(method = %request.method, path = %request.path, "Sending request");
        let response = builder
            .send()
            .await
            .map_err(|e| TransportFailure::connection(describe_reqwest_error(&e)))?;

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| TransportFailure::connection(describe_reqwest_error(&e)))?;

        if !(200..300).contains(&status) {
            debug!(status, path = %request.path, "Request failed");
            return Err(TransportFailure::HttpError {
                status,
                body: text,
                retry_after,
            });
        }

        Ok(ApiResponse {
            status,
            body: parse_body(&text)?,
        })
    }
}

/// Parse a success body; empty bodies become `Value::Null`.
fn parse_body(text: &str) -> std::result::Result<Value, TransportFailure> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| TransportFailure::MalformedResponse {
        message: format!("expected JSON body: {e}"),
    })
}

/// Parse `Retry-After` as delta-seconds or an HTTP date.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

fn describe_reqwest_error(error: &reqwest::Error) -> String {
    let kind = if error.is_timeout() {
        "timeout"
    } else if error.is_connect() {
        "connect"
    } else if error.is_body() || error.is_decode() {
        "body"
    } else {
        "request"
    };
    // the URL carries query parameters; keep it out of messages
    format!("{kind} error: {}", strip_url(error))
}

fn strip_url(error: &reqwest::Error) -> String {
    match error.url() {
        Some(url) => error.to_string().replace(url.as_str(), "<url>"),
        None => error.to_string(),
    }
}
