//! Engine configuration, loaded from a TOML file with sane defaults for
//! every knob.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{GridlockError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub locks: LockConfig,
    pub channels: ChannelConfig,
    pub deadlock: DeadlockConfig,
}

impl CoordinationConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content =
            toml::to_string_pretty(self).map_err(|e| GridlockError::Config(e.to_string()))?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.locks.default_ttl_secs == 0 {
            errors.push("locks.default_ttl_secs must be greater than 0");
        }
        if self.locks.retry_delay_ms == 0 {
            errors.push("locks.retry_delay_ms must be greater than 0");
        }
        if self.channels.retention_secs == 0 {
            errors.push("channels.retention_secs must be greater than 0");
        }
        if self.deadlock.check_interval_secs == 0 {
            errors.push("deadlock.check_interval_secs must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GridlockError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease applied when acquire is called without an explicit TTL.
    pub default_ttl_secs: u64,
    /// Attempts made by the retry helper before giving up.
    pub retry_attempts: usize,
    pub retry_delay_ms: u64,
}

impl LockConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            retry_attempts: 10,
            retry_delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Messages older than this are removed by the maintenance prune.
    pub retention_secs: u64,
}

impl ChannelConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlockConfig {
    /// How often the background monitor looks for cycles.
    pub check_interval_secs: u64,
    /// When true, a detected cycle is resolved on the spot instead of only
    /// reported.
    pub auto_resolve: bool,
}

impl DeadlockConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl Default for DeadlockConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            auto_resolve: true,
        }
    }
}
