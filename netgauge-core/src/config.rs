//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/netgauge/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/netgauge/` (~/.config/netgauge/)
//! - Data: `$XDG_DATA_HOME/netgauge/` (~/.local/share/netgauge/)
//! - State/Logs: `$XDG_STATE_HOME/netgauge/` (~/.local/state/netgauge/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Analytics configuration
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Deserialize, Default)]
pub struct StorageConfig {
    /// Override for the SQLite database path
    pub database_path: Option<PathBuf>,
}

/// Analytics defaults
#[derive(Debug, Deserialize)]
pub struct AnalyticsConfig {
    /// Default size for top-N breakdowns (states, providers)
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Default page size for provider ranking
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            per_page: default_per_page(),
        }
    }
}

fn default_top_n() -> usize {
    crate::analytics::DEFAULT_TOP_N
}

fn default_per_page() -> i64 {
    crate::analytics::DEFAULT_PER_PAGE
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/netgauge/config.toml` (~/.config/netgauge/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("netgauge").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite database)
    ///
    /// `$XDG_DATA_HOME/netgauge/` (~/.local/share/netgauge/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("netgauge")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/netgauge/` (~/.local/state/netgauge/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("netgauge")
    }

    /// Returns the database file path, honoring the configured override
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("reports.db"))
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/netgauge/netgauge.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("netgauge.log")
    }
}
