//! Runtime configuration.
//!
//! Everything here has a default, so a run without a config file uses
//! `data.db`, 100 connections and 4 attempts with a one-second doubling
//! backoff.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::resilience::RetryPolicy;

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// SQLite database holding prompts and outcomes
    pub database: PathBuf,

    /// Ceiling on calls in flight across all models
    pub max_connections: usize,

    /// Retry behaviour for transient provider errors
    pub retry: RetryPolicy,

    /// OpenAI transport settings
    pub openai: OpenAiConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("data.db"),
            max_connections: audit_core::CONNECTION_LIMIT,
            retry: RetryPolicy::default(),
            openai: OpenAiConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_retries must be greater than zero".to_string(),
            ));
        }
        if !self.openai.base_url.starts_with("http://") && !self.openai.base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(
                "openai.base_url must start with http:// or https://".to_string(),
            ));
        }
        Ok(())
    }
}

/// OpenAI chat API settings. The API key itself only ever comes from the
/// environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,

    #[serde(with = "duration_human")]
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Serde adapter for durations written like `"1s"` or `"1m 30s"`.
pub(crate) mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
