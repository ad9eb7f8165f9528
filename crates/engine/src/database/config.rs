//! Database configuration via `tarn.toml`
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below. Load with [`TarnConfig::from_file`] or build one in code
//! and hand it to [`Database::open_with_config`](super::Database::open_with_config).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tarn_concurrency::RetryPolicy;
use tarn_core::{Error, Result};

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "tarn.toml";

/// Waiting on prepared transactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictConfig {
    /// Wait budget for operations that do not set their own (default: 60000)
    #[serde(default = "default_max_wait_ms")]
    pub default_max_wait_ms: u64,
    /// First poll interval while parked (default: 5)
    #[serde(default = "default_poll_base_ms")]
    pub poll_base_ms: u64,
    /// Poll interval ceiling (default: 100)
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,
    /// Restarts of an auto-commit write after a write conflict (default: 3)
    #[serde(default = "default_write_retries")]
    pub max_write_conflict_retries: u32,
}

fn default_max_wait_ms() -> u64 {
    60_000
}

fn default_poll_base_ms() -> u64 {
    5
}

fn default_poll_max_ms() -> u64 {
    100
}

fn default_write_retries() -> u32 {
    3
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            default_max_wait_ms: default_max_wait_ms(),
            poll_base_ms: default_poll_base_ms(),
            poll_max_ms: default_poll_max_ms(),
            max_write_conflict_retries: default_write_retries(),
        }
    }
}

/// Which operations the profiler records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProfileLevel {
    /// Record nothing
    #[default]
    Off,
    /// Record operations at or above `slow_ms`
    Slow,
    /// Record everything
    All,
}

/// Operation profiler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfilerConfig {
    /// Profiling level (default: "off")
    #[serde(default)]
    pub level: ProfileLevel,
    /// Slow operation threshold in milliseconds (default: 100)
    #[serde(default = "default_slow_ms")]
    pub slow_ms: u64,
    /// Entries kept before the oldest is evicted (default: 1024)
    #[serde(default = "default_profile_capacity")]
    pub capacity: usize,
}

fn default_slow_ms() -> u64 {
    100
}

fn default_profile_capacity() -> usize {
    1024
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            level: ProfileLevel::default(),
            slow_ms: default_slow_ms(),
            capacity: default_profile_capacity(),
        }
    }
}

/// Background version reclamation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReclaimConfig {
    /// Run the reclaimer thread (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pause between passes in milliseconds (default: 1000)
    #[serde(default = "default_reclaim_interval_ms")]
    pub interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_reclaim_interval_ms() -> u64 {
    1000
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_reclaim_interval_ms(),
        }
    }
}

/// Database configuration loaded from `tarn.toml`.
///
/// # Example
///
/// ```toml
/// [conflict]
/// default_max_wait_ms = 60000
///
/// [profiler]
/// level = "slow"
/// slow_ms = 100
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TarnConfig {
    /// Prepare conflict waiting.
    #[serde(default)]
    pub conflict: ConflictConfig,
    /// Operation profiler.
    #[serde(default)]
    pub profiler: ProfilerConfig,
    /// Version reclamation.
    #[serde(default)]
    pub reclaim: ReclaimConfig,
}

impl TarnConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tarn database configuration

[conflict]
# How long an operation may wait on prepared transactions when it does not
# set its own limit.
default_max_wait_ms = 60000
# Parked operations re-check on a capped exponential poll in case a
# resolution notification is missed.
poll_base_ms = 5
poll_max_ms = 100
# Auto-commit writes restart this many times after a write conflict.
max_write_conflict_retries = 3

[profiler]
# "off", "slow" (operations taking at least slow_ms) or "all"
level = "off"
slow_ms = 100
capacity = 1024

[reclaim]
# Drop versions no live snapshot can observe.
enabled = true
interval_ms = 1000
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: TarnConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.conflict.poll_base_ms == 0 {
            return Err(Error::Config("conflict.poll_base_ms must be positive".into()));
        }
        if self.conflict.poll_max_ms < self.conflict.poll_base_ms {
            return Err(Error::Config(format!(
                "conflict.poll_max_ms ({}) is below conflict.poll_base_ms ({})",
                self.conflict.poll_max_ms, self.conflict.poll_base_ms
            )));
        }
        if self.profiler.capacity == 0 {
            return Err(Error::Config("profiler.capacity must be positive".into()));
        }
        if self.reclaim.enabled && self.reclaim.interval_ms == 0 {
            return Err(Error::Config("reclaim.interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Retry policy for the conflict scheduler.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_default_max_wait(Duration::from_millis(self.conflict.default_max_wait_ms))
            .with_poll_base_ms(self.conflict.poll_base_ms)
            .with_poll_max_ms(self.conflict.poll_max_ms)
    }

    /// Pause between reclaimer passes.
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim.interval_ms)
    }
}
