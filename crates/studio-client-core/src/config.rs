//! Client configuration.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event_bus::{DEFAULT_CAPACITY, DEFAULT_HISTORY_LIMIT};

/// Environment variable overriding [`ClientConfig::base_url`].
pub const ENV_BASE_URL: &str = "STUDIO_BASE_URL";

/// Environment variable overriding [`ClientConfig::query`].
pub const ENV_QUERY: &str = "STUDIO_QUERY";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Endpoint and buffering configuration for a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the studio server, without a trailing slash.
    pub base_url: String,
    /// Raw query string appended to the init path, e.g. `?instance=default`.
    pub query: String,
    /// Per-request timeout. Unset means the transport's default.
    pub request_timeout_secs: Option<u64>,
    /// Live event channel capacity.
    pub event_capacity: usize,
    /// Events retained for late subscribers.
    pub history_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_owned(),
            query: String::new(),
            request_timeout_secs: None,
            event_capacity: DEFAULT_CAPACITY,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl ClientConfig {
    /// Create a config for a base URL with default limits.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Parse from TOML and validate.
    ///
    /// # Errors
    /// Returns error if the text is not valid TOML or fails validation.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validated()
    }

    /// Load from a TOML file and validate.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Apply `STUDIO_BASE_URL` / `STUDIO_QUERY` from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.base_url = base_url;
        }
        if let Some(query) = lookup(ENV_QUERY) {
            self.query = query;
        }
        self
    }

    /// Normalize and check the configuration.
    ///
    /// # Errors
    /// Returns error if the base URL is empty or not HTTP(S).
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        let trimmed = self.base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ConfigError::Invalid("base_url is empty".into()));
        }
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "base_url must be http(s): {trimmed}"
            )));
        }
        self.base_url = trimmed.to_owned();

        if !self.query.is_empty() && !self.query.starts_with('?') {
            self.query.insert(0, '?');
        }
        Ok(self)
    }

    /// Request timeout as a duration.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
