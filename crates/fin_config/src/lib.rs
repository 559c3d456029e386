//! Configuration management for FinSync
//!
//! This crate handles loading `.finsync/config.toml`

use fin_common::{FinError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding config, local database and logs
pub const CONFIG_DIR: &str = ".finsync";

/// Environment variable overriding `[remote] api_key`
pub const API_KEY_ENV: &str = "FINSYNC_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Workspace root (set programmatically, not in TOML)
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sync: SyncSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote backend ([remote])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    /// Bearer token of the signed-in session
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:54321".to_string()
}
fn default_timeout_secs() -> u64 {
    15
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            access_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Local durable store ([storage])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Relative paths resolve against the config directory
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("offline.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Sync settings ([sync])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_true")]
    pub auto_sync: bool,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Failed replays before an operation is parked as failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_true")]
    pub pull_after_replay: bool,
}

fn default_true() -> bool {
    true
}
fn default_interval_secs() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    5
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            auto_sync: true,
            interval_secs: default_interval_secs(),
            max_retries: default_max_retries(),
            pull_after_replay: true,
        }
    }
}

/// Logging ([logging])
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub json: bool,
}

impl Config {
    /// Load configuration from workspace root
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let config_path = Self::config_path(workspace_root);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| FinError::ConfigError(format!("Failed to read config: {}", e)))?;
            toml::from_str::<Config>(&content)
                .map_err(|e| FinError::ConfigError(format!("Failed to parse config: {}", e)))?
        } else {
            tracing::debug!("No config at {:?}, using defaults", config_path);
            Config::default()
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                config.remote.api_key = key;
            }
        }

        config.root = workspace_root.to_path_buf();
        Ok(config)
    }

    pub fn config_path(workspace_root: &Path) -> PathBuf {
        workspace_root.join(CONFIG_DIR).join("config.toml")
    }

    /// Absolute path of the local database
    pub fn db_path(&self) -> PathBuf {
        if self.storage.db_path.is_absolute() {
            self.storage.db_path.clone()
        } else {
            self.root.join(CONFIG_DIR).join(&self.storage.db_path)
        }
    }

    /// Write a default config file, returning false when one already exists
    pub fn write_default(workspace_root: &Path) -> Result<bool> {
        let path = Self::config_path(workspace_root);
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| FinError::ConfigError(format!("Failed to render config: {}", e)))?;
        std::fs::write(&path, content)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = Config::load(temp.path()).unwrap();
        assert_eq!(config.sync.max_retries, 5);
        assert!(config.sync.auto_sync);
        assert_eq!(config.db_path(), temp.path().join(".finsync/offline.db"));
    }

    #[test]
    fn test_partial_file_keeps_section_defaults() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child(".finsync/config.toml")
            .write_str("[sync]\nmax_retries = 2\n\n[remote]\nbase_url = \"https://api.example.com\"\n")
            .unwrap();

        let config = Config::load(temp.path()).unwrap();
        assert_eq!(config.sync.max_retries, 2);
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.remote.base_url, "https://api.example.com");
        assert_eq!(config.remote.timeout_secs, 15);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child(".finsync/config.toml").write_str("[sync\n").unwrap();
        assert!(matches!(Config::load(temp.path()), Err(FinError::ConfigError(_))));
    }

    #[test]
    fn test_write_default_is_idempotent() {
        let temp = assert_fs::TempDir::new().unwrap();
        assert!(Config::write_default(temp.path()).unwrap());
        assert!(!Config::write_default(temp.path()).unwrap());
        let config = Config::load(temp.path()).unwrap();
        assert_eq!(config.storage.db_path, PathBuf::from("offline.db"));
    }
}
