//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/kasocheck/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/kasocheck/` (~/.config/kasocheck/)
//! - Data: `$XDG_DATA_HOME/kasocheck/` (~/.local/share/kasocheck/)
//! - State/Logs: `$XDG_STATE_HOME/kasocheck/` (~/.local/state/kasocheck/)

use crate::activity::{ThresholdLadder, DEFAULT_THRESHOLDS_PER_DAY};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

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
    /// Tracking, retention and classification settings
    #[serde(default)]
    pub activity: ActivityConfig,

    /// Report defaults
    #[serde(default)]
    pub report: ReportConfig,

    /// History backfill settings
    #[serde(default)]
    pub backfill: BackfillConfig,

    /// Storage backend selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Activity tracking configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ActivityConfig {
    /// Events older than this many days are pruned
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Per-day thresholds for levels 1..9, strictly descending
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<u64>,

    /// Seconds between retention sweeps
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            thresholds: default_thresholds(),
            prune_interval_secs: default_prune_interval(),
        }
    }
}

impl ActivityConfig {
    /// Build the validated threshold ladder.
    pub fn ladder(&self) -> Result<ThresholdLadder> {
        ThresholdLadder::new(&self.thresholds)
    }

    /// Interval between retention sweeps.
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

fn default_retention_days() -> u32 {
    30
}

fn default_thresholds() -> Vec<u64> {
    DEFAULT_THRESHOLDS_PER_DAY.to_vec()
}

fn default_prune_interval() -> u64 {
    3600
}

/// Report defaults used by the command layer
#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    /// Lookback window in days
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Number of channels in the top list
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Units in a rendered share bar
    #[serde(default = "default_bar_length")]
    pub bar_length: usize,

    /// Character budget for each list section
    #[serde(default = "default_field_limit")]
    pub field_limit: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            top_n: default_top_n(),
            bar_length: default_bar_length(),
            field_limit: default_field_limit(),
        }
    }
}

fn default_window_days() -> u32 {
    7
}

fn default_top_n() -> usize {
    10
}

fn default_bar_length() -> usize {
    8
}

fn default_field_limit() -> usize {
    1024
}

/// How backfilled history interacts with events already in the store
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    /// Only import history older than the real-time boundary fixed by the
    /// channel's first backfill, each message at most once
    #[default]
    BeforeEarliest,
    /// Import every human message, duplicates included
    KeepAll,
}

/// History backfill configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BackfillConfig {
    /// Imported items between durability checkpoints
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,

    /// Pause after each checkpoint, in milliseconds
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,

    /// Messages requested per history page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Overlap handling
    #[serde(default)]
    pub overlap: OverlapPolicy,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            progress_every: default_progress_every(),
            pause_ms: default_pause_ms(),
            page_size: default_page_size(),
            overlap: OverlapPolicy::default(),
        }
    }
}

impl BackfillConfig {
    /// Pause after each checkpoint.
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

fn default_progress_every() -> usize {
    200
}

fn default_pause_ms() -> u64 {
    500
}

fn default_page_size() -> usize {
    100
}

/// Supported storage backends
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One row per event in SQLite
    #[default]
    Sqlite,
    /// Single JSON document keyed by guild and channel
    Json,
}

/// Storage configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Backend used by the CLI
    #[serde(default)]
    pub backend: StorageBackend,

    /// Override for the store file location
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved store path for the selected backend
    pub fn resolved_path(&self) -> PathBuf {
        match (&self.path, self.backend) {
            (Some(path), _) => path.clone(),
            (None, StorageBackend::Sqlite) => Config::database_path(),
            (None, StorageBackend::Json) => Config::document_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,

    /// Also write events at or above this level to stderr
    #[serde(default)]
    pub stderr_level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
            stderr_level: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load and validate configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load and validate configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Check every setting that would otherwise produce silently wrong results
    pub fn validate(&self) -> Result<()> {
        self.activity.ladder()?;

        if self.activity.retention_days == 0 {
            return Err(Error::Config(
                "activity.retention_days must be at least 1".to_string(),
            ));
        }
        if self.activity.prune_interval_secs == 0 {
            return Err(Error::Config(
                "activity.prune_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.backfill.progress_every == 0 {
            return Err(Error::Config(
                "backfill.progress_every must be at least 1".to_string(),
            ));
        }
        if self.backfill.page_size == 0 {
            return Err(Error::Config(
                "backfill.page_size must be at least 1".to_string(),
            ));
        }
        if let Some(level) = &self.logging.stderr_level {
            crate::logging::parse_level(level)?;
        }
        if self.report.field_limit < 64 {
            return Err(Error::Config(
                "report.field_limit must be at least 64".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/kasocheck/config.toml` (~/.config/kasocheck/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("kasocheck").join("config.toml")
    }

    /// Returns the data directory path
    ///
    /// `$XDG_DATA_HOME/kasocheck/` (~/.local/share/kasocheck/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("kasocheck")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/kasocheck/` (~/.local/state/kasocheck/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("kasocheck")
    }

    /// Returns the SQLite database path
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("activity.db")
    }

    /// Returns the JSON document path used by the `json` backend
    pub fn document_path() -> PathBuf {
        Self::data_dir().join("kaso_data.json")
    }
}
