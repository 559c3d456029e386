//! Configuration for the sync engine

use fin_config::Config;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Engine settings resolved from `.finsync/config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// SQLite file holding entities, the queue and the id map
    pub db_path: PathBuf,

    /// Failed replays before an operation is parked (default: 5)
    pub max_retries: u32,

    /// Background sync period (default: 5 minutes)
    pub interval: Duration,

    pub auto_sync: bool,

    /// Refresh every collection after the queue drains
    pub pull_after_replay: bool,

    /// Store actor mailbox size
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".finsync/offline.db"),
            max_retries: 5,
            interval: Duration::from_secs(300),
            auto_sync: true,
            pull_after_replay: true,
            channel_capacity: 64,
        }
    }
}

impl SyncConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            db_path: config.db_path(),
            max_retries: config.sync.max_retries,
            interval: Duration::from_secs(config.sync.interval_secs),
            auto_sync: config.sync.auto_sync,
            pull_after_replay: config.sync.pull_after_replay,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be at least 1");
        }
        if self.auto_sync && self.interval < Duration::from_secs(5) {
            anyhow::bail!("interval_secs must be at least 5 when auto_sync is enabled");
        }
        if self.channel_capacity == 0 {
            anyhow::bail!("channel_capacity cannot be zero");
        }
        Ok(())
    }
}
