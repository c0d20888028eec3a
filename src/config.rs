//! Application configuration types and loading.

use std::{fs, path::Path};

use data_connector::RedisConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sources::SourceConfigs;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Orchestrator configuration.
///
/// The `sources` section is required: deserialization fails without it, so
/// a misconfigured deployment dies at startup instead of serving nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    pub sources: SourceConfigs,

    #[serde(rename = "maxActiveSessions", default = "default_max_active_sessions")]
    pub max_active_sessions: usize,

    #[serde(rename = "maxQueuedSessions", default = "default_max_queued_sessions")]
    pub max_queued_sessions: usize,

    #[serde(
        rename = "sessionTimeoutSeconds",
        default = "default_session_timeout_seconds"
    )]
    pub session_timeout_seconds: u64,

    #[serde(rename = "maxVulnsToServe", default = "default_max_vulns_to_serve")]
    pub max_vulns_to_serve: usize,
}

fn default_max_active_sessions() -> usize {
    128
}

fn default_max_queued_sessions() -> usize {
    1024
}

fn default_session_timeout_seconds() -> u64 {
    30
}

fn default_max_vulns_to_serve() -> usize {
    128
}

impl StateConfig {
    /// A config with the given sources and default tunables.
    pub fn new(sources: SourceConfigs) -> Self {
        Self {
            sources,
            max_active_sessions: default_max_active_sessions(),
            max_queued_sessions: default_max_queued_sessions(),
            session_timeout_seconds: default_session_timeout_seconds(),
            max_vulns_to_serve: default_max_vulns_to_serve(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.sources.validate()?;
        if self.max_vulns_to_serve == 0 {
            return Err("maxVulnsToServe must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9002
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: HttpConfig,
    pub state: StateConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

/// Load and validate the configuration from a JSON file.
pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let config: AppConfig = serde_json::from_str(&raw)?;

    config.state.validate().map_err(ConfigError::Invalid)?;
    if let Some(redis) = &config.redis {
        redis.validate().map_err(ConfigError::Invalid)?;
    }

    Ok(config)
}
