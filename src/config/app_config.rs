use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, LevelFilter};
use serde::{Deserialize, Serialize};

use crate::bluetooth::enumeration::bluetooth_protocol_filter;
use crate::errors::ConfigError;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Minimum level written by the logger
    pub log_level: LogLevel,

    /// Optional log file, appended to
    pub log_file: Option<PathBuf>,

    /// Per-category debug switches
    pub debug: DebugFlags,

    /// Device discovery settings
    pub discovery: DiscoveryConfig,
}

/// Log level setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        f.write_str(name)
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Debug flag categories for selective logging
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugFlags {
    pub discovery: bool, // Watcher lifecycle, platform enumeration callbacks
    pub status: bool,    // Status monitor resolution and change notifications
    pub sync: bool,      // Intake processing, canonical list mutations
    pub config: bool,    // Configuration loading, saving, validation
    pub system: bool,    // Everything else
    pub all: bool,       // Enable all debug output
}

/// Device discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Filter expression handed to the enumeration subsystem
    pub protocol_filter: String,

    /// Paired flag reported by backends that cannot read bond state
    pub assume_paired: bool,

    /// Seconds without an advertisement before a device is reported lost
    pub lost_device_timeout: u64,

    /// Seconds after start before the initial enumeration is reported settled
    pub enumeration_settle: u64,

    /// Optional run time in seconds for the watch command
    pub run_duration: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_file: None,
            debug: DebugFlags::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            protocol_filter: bluetooth_protocol_filter(),
            assume_paired: true,
            lost_device_timeout: 30,
            enumeration_settle: 5,
            run_duration: None,
        }
    }
}

impl DiscoveryConfig {
    /// Lost device timeout as a duration
    pub fn lost_timeout(&self) -> Duration {
        Duration::from_secs(self.lost_device_timeout)
    }

    /// Enumeration settle delay as a duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.enumeration_settle)
    }
}

impl AppConfig {
    /// Load configuration from the default settings path
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&default_settings_path())
    }

    /// Load configuration from a file, falling back to defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;

        info!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Save configuration to the default settings path
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&default_settings_path())
    }

    /// Save configuration to a file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;

        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Check that the settings are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.protocol_filter.trim().is_empty() {
            return Err(ConfigError::Invalid("protocol_filter must not be empty".to_string()));
        }
        if self.discovery.lost_device_timeout == 0 {
            return Err(ConfigError::Invalid("lost_device_timeout must be greater than zero".to_string()));
        }
        if self.discovery.enumeration_settle == 0 {
            return Err(ConfigError::Invalid("enumeration_settle must be greater than zero".to_string()));
        }
        if self.discovery.run_duration == Some(0) {
            return Err(ConfigError::Invalid("run_duration must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Get the default settings path
pub fn default_settings_path() -> PathBuf {
    dirs_next::config_dir()
        .map(|config_dir| config_dir.join("pairwatch").join("settings.json"))
        .unwrap_or_else(|| PathBuf::from("settings.json"))
}
