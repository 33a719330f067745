//! Configuration for connection parameters and idle teardown

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default idle grace period in milliseconds
pub const DEFAULT_GRACE_MS: u64 = 1_000;

/// Connection parameters consumed by the supplier at `open()` time
///
/// All fields are opaque strings from the registry's point of view; the
/// supplier decides what they mean.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectConfig {
    /// Connection URL (e.g. `sqlite://state.db?mode=rwc`)
    pub url: String,

    /// Login identity, if the driver uses one
    #[serde(default)]
    pub user: String,

    /// Login credential, if the driver uses one
    #[serde(default)]
    pub password: String,

    /// Driver selector (e.g. `sqlite`)
    pub driver: String,
}

impl ConnectConfig {
    /// Load connection parameters from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::io(path.display().to_string(), source))?;

        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if self.driver.is_empty() {
            return Err(ConfigError::EmptyDriver);
        }
        Ok(())
    }
}

/// Idle teardown tuning
///
/// The shared connection is kept open for `grace` after the last lease is
/// released, absorbing rapid release-then-reacquire cycles without paying
/// the open cost again.
#[derive(Debug, Clone)]
pub struct IdleConfig {
    /// How long the connection stays open after becoming idle
    pub grace: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(DEFAULT_GRACE_MS),
        }
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// url field is empty
    #[error("url cannot be empty")]
    EmptyUrl,

    /// driver field is empty
    #[error("driver cannot be empty")]
    EmptyDriver,

    /// Failed to parse JSON configuration
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Failed to read configuration file
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// Path of the file that could not be read
        path: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Create an IO error with path context
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
