//! Gateway configuration.
//!
//! Settings come from three layers, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. An optional YAML file
//! 3. `YOUTRACK_*` environment variables
//!
//! ```yaml
//! url: https://youtrack.example.com
//! api_token: perm:admin.workspace.secret
//! verify_ssl: true
//! timeout_secs: 30
//! max_retries: 3
//! retry_delay_ms: 1000
//! deadline_secs: 120
//! ```

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum attempts for retry-safe requests.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base backoff in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default limit on one governed call, retries included, in seconds.
pub const DEFAULT_DEADLINE_SECS: u64 = 120;

/// Connection and retry settings for a YouTrack instance.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Instance URL, with or without a trailing `/api`.
    pub url: Option<String>,

    /// Permanent API token.
    pub api_token: Option<String>,

    /// File holding the token, read when `api_token` is unset.
    pub token_file: Option<PathBuf>,

    /// Whether this is a YouTrack Cloud instance.
    pub cloud: bool,

    /// Cloud workspace name, used to derive the URL when `url` is unset.
    pub workspace: Option<String>,

    /// Verify TLS certificates.
    pub verify_ssl: bool,

    /// Connect/read timeout in seconds.
    pub timeout_secs: u64,

    /// Maximum attempts for retry-safe requests.
    pub max_retries: u32,

    /// Base backoff between attempts, in milliseconds.
    pub retry_delay_ms: u64,

    /// Limit on one call including all retries, in seconds; 0 disables it.
    pub deadline_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_token: None,
            token_file: None,
            cloud: false,
            workspace: None,
            verify_ssl: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            deadline_secs: DEFAULT_DEADLINE_SECS,
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("url", &self.url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[redacted]"))
            .field("token_file", &self.token_file)
            .field("cloud", &self.cloud)
            .field("workspace", &self.workspace)
            .field("verify_ssl", &self.verify_ssl)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("deadline_secs", &self.deadline_secs)
            .finish()
    }
}

impl GatewayConfig {
    /// Load configuration from the process environment and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is malformed or a required setting is missing.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file, then apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or validation fails.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading gateway config");
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yaml::from_str(&content)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `YOUTRACK_*` overrides using `lookup` to read variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSetting`] for unparseable boolean or numeric values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("YOUTRACK_URL") {
            self.url = Some(url);
        }
        if let Some(token) = get("YOUTRACK_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(path) = get("YOUTRACK_TOKEN_FILE") {
            self.token_file = Some(PathBuf::from(path));
        }
        if let Some(workspace) = get("YOUTRACK_WORKSPACE") {
            self.workspace = Some(workspace);
        }
        if let Some(value) = get("YOUTRACK_CLOUD") {
            self.cloud = parse_bool("YOUTRACK_CLOUD", &value)?;
        }
        if let Some(value) = get("YOUTRACK_VERIFY_SSL") {
            self.verify_ssl = parse_bool("YOUTRACK_VERIFY_SSL", &value)?;
        }
        if let Some(value) = get("YOUTRACK_TIMEOUT_SECS") {
            self.timeout_secs = parse_number("YOUTRACK_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = get("YOUTRACK_MAX_RETRIES") {
            self.max_retries = parse_number("YOUTRACK_MAX_RETRIES", &value)?;
        }
        if let Some(value) = get("YOUTRACK_RETRY_DELAY_MS") {
            self.retry_delay_ms = parse_number("YOUTRACK_RETRY_DELAY_MS", &value)?;
        }
        if let Some(value) = get("YOUTRACK_DEADLINE_SECS") {
            self.deadline_secs = parse_number("YOUTRACK_DEADLINE_SECS", &value)?;
        }
        Ok(())
    }

    /// Check that a token and a base URL can be resolved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingSetting`] when the token or URL cannot be determined.
    pub fn validate(&self) -> Result<()> {
        self.resolve_token()?;
        self.api_root()?;
        Ok(())
    }

    /// The API token, read from `token_file` when not set directly.
    ///
    /// # Errors
    ///
    /// Returns an error if neither source yields a non-empty token.
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(token) = self.api_token.as_deref().map(str::trim)
            && !token.is_empty()
        {
            return Ok(token.to_string());
        }

        if let Some(path) = &self.token_file {
            let token = std::fs::read_to_string(path)?.trim().to_string();
            if !token.is_empty() {
                return Ok(token);
            }
        }

        Err(Error::MissingSetting {
            name: "YOUTRACK_API_TOKEN",
            hint: "Set YOUTRACK_API_TOKEN or point YOUTRACK_TOKEN_FILE at a file containing the token.",
        })
    }

    /// The REST API root, always ending in `/api` and without a trailing slash.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingSetting`] if no URL is configured and none can be
    /// derived for a cloud instance.
    pub fn api_root(&self) -> Result<String> {
        let base = match self.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => self.cloud_url()?,
        };

        if base.ends_with("/api") {
            Ok(base)
        } else {
            Ok(format!("{base}/api"))
        }
    }

    /// Timeout applied to each request.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Retry policy for retry-safe requests.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.retry_delay_ms),
            deadline: (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs)),
            ..RetryPolicy::default()
        }
    }

    fn cloud_url(&self) -> Result<String> {
        if !self.cloud {
            return Err(missing_url());
        }
        if let Some(workspace) = self.workspace.as_deref().filter(|w| !w.is_empty()) {
            return Ok(format!("https://{workspace}.youtrack.cloud"));
        }

        // perm:user.workspace.secret carries the workspace as its second segment
        let token = self.api_token.as_deref().unwrap_or_default();
        if let Some(rest) = token.strip_prefix("perm:")
            && let Some(workspace) = rest.split('.').nth(1).filter(|w| !w.is_empty())
        {
            return Ok(format!("https://{workspace}.youtrack.cloud"));
        }

        Err(missing_url())
    }
}

fn missing_url() -> Error {
    Error::MissingSetting {
        name: "YOUTRACK_URL",
        hint: "Set YOUTRACK_URL, or set YOUTRACK_CLOUD=true with YOUTRACK_WORKSPACE or a perm:user.workspace.secret token.",
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidSetting {
            name,
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::InvalidSetting {
        name,
        value: value.to_string(),
    })
}
