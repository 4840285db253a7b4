//! taskdispatch configuration
//!
//! Pool sizing, group limits and tracing, loaded from TOML.
//!
//! # Lookup order
//!
//! ```text
//! 1. Explicit path (CLI --config)
//! 2. User-level (~/.config/taskdispatch/config.toml)
//! 3. Default values
//! ```
//!
//! # Example
//!
//! ```toml
//! [pool]
//! high_workers = 8
//! default_workers = 16
//! low_workers = 8
//! max_threads = 32
//!
//! [group]
//! notification_capacity = 1000
//!
//! [trace]
//! enabled = true
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::runtime::error::{DispatchError, DispatchResult};
use crate::runtime::group::DEFAULT_NOTIFICATION_CAPACITY;
use crate::runtime::pool::PoolConfig;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DispatchConfig {
    /// Worker pool settings
    #[serde(default)]
    pub pool: PoolConfig,
    /// Completion group settings
    #[serde(default)]
    pub group: GroupConfig,
    /// Submission tracing
    #[serde(default)]
    pub trace: TraceConfig,
}

/// Completion group configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Bound on notifications queued per group
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

fn default_notification_capacity() -> usize {
    DEFAULT_NOTIFICATION_CAPACITY
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

/// Trace hook configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Install the logging tracer on every dispatcher
    #[serde(default = "default_trace_enabled")]
    pub enabled: bool,
}

fn default_trace_enabled() -> bool {
    true
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl DispatchConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check pool limits and group capacity.
    pub fn validate(&self) -> DispatchResult<()> {
        self.pool.validate()?;
        if self.group.notification_capacity == 0 {
            return Err(DispatchError::InvalidConfig(
                "group.notification_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("taskdispatch"));
    }

    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("taskdispatch"));
    }

    // Windows
    if let Ok(appdata) = std::env::var("APPDATA") {
        return Some(PathBuf::from(appdata).join("taskdispatch"));
    }

    None
}

/// Get the user config file path (~/.config/taskdispatch/config.toml)
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// Load and validate the configuration at `path`.
pub fn load_config(path: &Path) -> Result<DispatchConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    DispatchConfig::from_toml_str(&content)
}

/// Load user-level configuration
/// Returns default config if file doesn't exist
pub fn load_user_config() -> Result<DispatchConfig, ConfigError> {
    match get_config_path() {
        Some(path) if path.exists() => load_config(&path),
        _ => Ok(DispatchConfig::default()),
    }
}

/// Write `config` to `path`, creating parent directories.
pub fn save_config(
    path: &Path,
    config: &DispatchConfig,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }
    fs::write(path, config.to_toml_string()?)?;
    Ok(())
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(#[from] DispatchError),
}
