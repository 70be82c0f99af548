use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct CompassConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub timelock: TimelockConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_db_path() -> String {
    "./data/accounts".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
        }
    }
}

/// Delays, in seconds, applied to every account created with this config.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct TimelockConfig {
    #[serde(default = "default_credential_delay")]
    pub credential_delay_secs: u64,
    #[serde(default = "default_recovery_delay")]
    pub recovery_delay_secs: u64,
    #[serde(default = "default_hook_removal_delay")]
    pub hook_removal_delay_secs: u64,
}

fn default_credential_delay() -> u64 {
    2 * 24 * 60 * 60
}

fn default_recovery_delay() -> u64 {
    3 * 24 * 60 * 60
}

fn default_hook_removal_delay() -> u64 {
    24 * 60 * 60
}

impl Default for TimelockConfig {
    fn default() -> Self {
        Self {
            credential_delay_secs: default_credential_delay(),
            recovery_delay_secs: default_recovery_delay(),
            hook_removal_delay_secs: default_hook_removal_delay(),
        }
    }
}

impl Default for CompassConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            timelock: TimelockConfig::default(),
        }
    }
}

impl CompassConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults (and writing them out) when the
    /// file is missing. A file that exists but is broken also yields
    /// defaults, with a warning.
    pub fn load_or_default(path: &str) -> Self {
        if Path::new(path).exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!(path, "config loaded");
                    config
                }
                Err(e) => {
                    warn!(path, error = %e, "config unusable, using defaults");
                    Self::default()
                }
            }
        } else {
            info!(path, "config not found, creating default");
            let config = Self::default();
            if let Ok(s) = toml::to_string_pretty(&config) {
                if let Err(e) = std::fs::write(path, s) {
                    warn!(path, error = %e, "could not write default config");
                }
            }
            config
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timelock;
        for (name, value) in [
            ("credential_delay_secs", t.credential_delay_secs),
            ("recovery_delay_secs", t.recovery_delay_secs),
            ("hook_removal_delay_secs", t.hook_removal_delay_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        if self.storage.db_path.trim().is_empty() {
            return Err(ConfigError::Invalid("db_path is empty".into()));
        }
        Ok(())
    }
}
