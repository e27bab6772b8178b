//! Error types for pairwatch

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::bluetooth::WatcherState;

/// Failure reported by the external enumeration subsystem
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnumerationError {
    /// The subsystem refused to create a watcher
    #[error("Failed to create device watcher: {0}")]
    CreateFailed(String),

    /// The watcher could not be started
    #[error("Failed to start device watcher: {0}")]
    StartFailed(String),

    /// The watcher could not be stopped
    #[error("Failed to stop device watcher: {0}")]
    StopFailed(String),

    /// A callback channel could not be registered
    #[error("Failed to register watcher callback: {0}")]
    RegistrationFailed(String),

    /// Platform Bluetooth API error
    #[error("Bluetooth API error: {0}")]
    Platform(String),
}

impl From<btleplug::Error> for EnumerationError {
    fn from(error: btleplug::Error) -> Self {
        Self::Platform(error.to_string())
    }
}

/// Errors raised by the discovery watcher lifecycle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WatcherError {
    /// The subsystem could not create or start the watcher
    #[error("Device watcher could not be started: {0}")]
    Construction(#[source] EnumerationError),

    /// The requested operation is not valid in the current state
    #[error("Cannot {operation} watcher while {state}")]
    InvalidTransition {
        state: WatcherState,
        operation: &'static str,
    },

    /// The watcher has been disposed
    #[error("Device watcher has been disposed")]
    Disposed,

    /// The halt request failed
    #[error("Device watcher could not be stopped: {0}")]
    Halt(#[source] EnumerationError),
}

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the settings file failed
    #[error("Settings IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file is not valid JSON for the config schema
    #[error("Settings parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Settings were parsed but are not usable
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Watcher lifecycle error
    #[error("Discovery error: {0}")]
    Watcher(#[from] WatcherError),

    /// Enumeration subsystem error
    #[error("Enumeration error: {0}")]
    Enumeration(#[from] EnumerationError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Logging could not be initialized
    #[error("Logging error: {0}")]
    Logging(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

/// Where an error happened, for contextual logging
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Component that detected the error
    pub component: String,
    /// Operation that was running
    pub operation: String,
    /// Extra key/value details
    pub metadata: HashMap<String, String>,
    /// Message suitable for showing to the user
    pub user_message: Option<String>,
}

impl ErrorContext {
    /// Create a context for a component operation
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            metadata: HashMap::new(),
            user_message: None,
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach a user facing message
    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}::{}] ", self.component, self.operation)
    }
}
