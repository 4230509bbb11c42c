//! Configuration management for authfile
//!
//! Built-in defaults, overridden by an optional `authfile.toml`, overridden
//! by `AUTHFILE_*` environment variables (e.g. `AUTHFILE_SYNC_INTERVAL_SECS`).

use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::storage::{DEFAULT_COST, MAX_COST, MIN_COST, cost_is_valid};

/// Default configuration file name, looked up in the working directory.
const DEFAULT_CONFIG_FILE: &str = "authfile";

/// Credential store and cache service settings
#[derive(Debug, Deserialize, Clone)]
pub struct AuthfileConfig {
    /// Credential file location
    pub path: PathBuf,

    /// Mode used when the credential file is created (e.g. `0o600`)
    pub permissions: u32,

    /// How long writers wait for the file lock
    pub lock_timeout_ms: u64,

    /// Period of the background sync; 0 disables it
    pub sync_interval_secs: u64,

    /// Worker threads used for hashing and sync
    pub workers: usize,

    /// bcrypt cost applied to newly hashed passwords
    pub cost: u32,
}

impl AuthfileConfig {
    /// Load configuration from `authfile.toml` (if present) with environment overrides
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load configuration from the given file (if present) with environment overrides
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        let settings = Self::defaults()?
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("AUTHFILE").try_parsing(true))
            .build()?;

        let config: AuthfileConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Config::builder()
            .set_default("path", "authfile.passwd")?
            .set_default("permissions", 0o600_i64)?
            .set_default("lock_timeout_ms", 5000_i64)?
            .set_default("sync_interval_secs", 1_i64)?
            .set_default("workers", workers as i64)?
            .set_default("cost", DEFAULT_COST as i64)
    }

    /// Validation for all configuration values
    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(config::ConfigError::Message("path cannot be empty".into()));
        }

        if self.lock_timeout_ms == 0 {
            return Err(config::ConfigError::Message(
                "lock_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.workers == 0 {
            return Err(config::ConfigError::Message(
                "workers must be greater than 0".into(),
            ));
        }

        if !cost_is_valid(self.cost) {
            return Err(config::ConfigError::Message(format!(
                "cost must be between {MIN_COST} and {MAX_COST}, got {}",
                self.cost
            )));
        }

        Ok(())
    }

    /// Get lock timeout as Duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Get sync interval as Duration
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}
