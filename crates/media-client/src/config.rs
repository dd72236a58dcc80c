//! Media client configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration shared by every proxy of one [`MediaContext`](crate::MediaContext)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaApiConfig {
    /// Address the media server sends subscribed events to
    ///
    /// Default: "127.0.0.1"
    #[serde(default = "default_handler_address")]
    pub handler_address: String,

    /// Port the media server sends subscribed events to
    ///
    /// Default: 9191
    #[serde(default = "default_handler_port")]
    pub handler_port: u16,

    /// Maximum connections per pool flavor
    ///
    /// Default: 8
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// How long an acquisition waits for a free connection (milliseconds)
    ///
    /// Default: 5000ms
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Period of the keepalive scheduler (milliseconds)
    ///
    /// Should stay well below the server's object time-to-live.
    /// Default: 60000ms
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
}

fn default_handler_address() -> String {
    "127.0.0.1".to_string()
}

fn default_handler_port() -> u16 {
    9191
}

fn default_max_connections() -> usize {
    8
}

fn default_acquire_timeout_ms() -> u64 {
    5000
}

fn default_keepalive_interval_ms() -> u64 {
    60000
}

impl Default for MediaApiConfig {
    fn default() -> Self {
        Self {
            handler_address: default_handler_address(),
            handler_port: default_handler_port(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
        }
    }
}

impl MediaApiConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| Error::ConfigError(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("Invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            Some("json") => Self::from_json_str(&contents),
            other => Err(Error::ConfigError(format!(
                "Unsupported config format {:?} for {}",
                other,
                path.display()
            ))),
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.handler_address.is_empty() {
            return Err(Error::ConfigError(
                "handler_address cannot be empty".to_string(),
            ));
        }
        if self.keepalive_interval_ms == 0 {
            return Err(Error::ConfigError(
                "keepalive_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the event handler address and port
    pub fn with_handler(mut self, address: impl Into<String>, port: u16) -> Self {
        self.handler_address = address.into();
        self.handler_port = port;
        self
    }

    /// Set the maximum number of connections per pool flavor
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the acquisition wait bound
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the keepalive period
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Acquisition wait bound
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Keepalive period
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}
