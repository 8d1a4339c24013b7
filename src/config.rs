//! Process configuration stored in ~/.affinity-sync/config.json.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::affinity::client::RetryPolicy;
use crate::error::SyncError;

/// Environment variable that overrides `apiKey` from the config file.
pub const API_KEY_ENV: &str = "AFFINITY_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_v1_base_url")]
    pub v1_base_url: String,
    #[serde(default = "default_v2_base_url")]
    pub v2_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_v1_base_url() -> String {
    "https://api.affinity.co/".to_string()
}

fn default_v2_base_url() -> String {
    "https://api.affinity.co/v2/".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            v1_base_url: default_v1_base_url(),
            v2_base_url: default_v2_base_url(),
            db_path: None,
            retry: RetryConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff_ms: self.retry.initial_backoff_ms,
            max_backoff_ms: self.retry.max_backoff_ms,
        }
    }

    /// API key, failing when neither the file nor the environment supplied one.
    pub fn require_api_key(&self) -> Result<&str, SyncError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                SyncError::Config(format!(
                    "No API key configured. Set \"apiKey\" in config.json or {}",
                    API_KEY_ENV
                ))
            })
    }

    /// Mirror database path, defaulting to `~/.affinity-sync/mirror.db`.
    pub fn resolved_db_path(&self) -> Result<PathBuf, SyncError> {
        match &self.db_path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Ok(state_dir()?.join("mirror.db")),
        }
    }
}

/// Get the state directory (~/.affinity-sync)
fn state_dir() -> Result<PathBuf, SyncError> {
    let home = dirs::home_dir()
        .ok_or_else(|| SyncError::Config("Could not find home directory".to_string()))?;
    Ok(home.join(".affinity-sync"))
}

/// Get the canonical config file path (~/.affinity-sync/config.json)
pub fn config_path() -> Result<PathBuf, SyncError> {
    Ok(state_dir()?.join("config.json"))
}

/// Load configuration from ~/.affinity-sync/config.json, applying env overrides.
pub fn load_config() -> Result<SyncConfig, SyncError> {
    let path = config_path()?;
    let api_key_env = std::env::var(API_KEY_ENV).ok();
    let config = load_config_from(&path, api_key_env)?;
    config.require_api_key()?;
    Ok(config)
}

/// Load configuration from an explicit path. A missing file yields defaults.
pub fn load_config_from(
    path: &Path,
    api_key_override: Option<String>,
) -> Result<SyncConfig, SyncError> {
    let mut config = if path.exists() {
        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("Failed to read config: {}", e)))?;
        serde_json::from_str::<SyncConfig>(&content)
            .map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))?
    } else {
        log::debug!("No config at {}, using defaults", path.display());
        SyncConfig::default()
    };

    if let Some(key) = api_key_override.filter(|k| !k.trim().is_empty()) {
        config.api_key = Some(key);
    }

    Ok(config)
}
