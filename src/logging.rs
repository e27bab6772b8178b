//! Structured logging for pairwatch
//!
//! A small `log` backend with timestamped lines, optional file output and
//! per-category debug switches so that the discovery, status and sync paths
//! can be traced independently.

use chrono::Local;
use log::Level;
use log::{LevelFilter, Metadata, Record};
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Mutex, Once, RwLock};

use crate::config::{DebugFlags, LogLevel};
use crate::errors::ErrorContext;

/// Timestamp format for log entries
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Global initialization guard
static INIT_LOGGER: Once = Once::new();

/// Global debug flags storage
static DEBUG_FLAGS: RwLock<DebugFlags> = RwLock::new(DebugFlags {
    discovery: false,
    status: false,
    sync: false,
    config: false,
    system: false,
    all: false,
});

/// Debug categories, selected from a record's module path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCategory {
    /// Watcher lifecycle and platform enumeration
    Discovery,
    /// Per-device status monitors
    Status,
    /// Intake processing and the canonical list
    Sync,
    /// Settings loading and validation
    Config,
    /// Everything else
    System,
}

impl DebugCategory {
    /// Classify a module path
    pub fn from_module_path(module_path: &str) -> Self {
        if module_path.contains("::watcher") || module_path.contains("::platform") {
            Self::Discovery
        } else if module_path.contains("::status_monitor") {
            Self::Status
        } else if module_path.contains("::sync") || module_path.contains("::manager") {
            Self::Sync
        } else if module_path.contains("::config") {
            Self::Config
        } else {
            Self::System
        }
    }

    fn enabled_in(self, flags: &DebugFlags) -> bool {
        flags.all
            || match self {
                Self::Discovery => flags.discovery,
                Self::Status => flags.status,
                Self::Sync => flags.sync,
                Self::Config => flags.config,
                Self::System => flags.system,
            }
    }
}

/// Logger implementation for pairwatch
pub struct PairwatchLogger {
    /// File output for logs
    file: Option<Mutex<File>>,
    /// Log level filter
    level: LevelFilter,
    /// Whether to output to stderr
    console_output: bool,
}

impl log::Log for PairwatchLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if metadata.level() > self.level {
            return false;
        }

        // Debug lines are additionally gated per category
        if metadata.level() == Level::Debug {
            return should_log_debug(metadata.target());
        }

        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now().format(TIMESTAMP_FORMAT);

        let level_str = match record.level() {
            Level::Error => "\x1B[31mERROR\x1B[0m", // Red
            Level::Warn => "\x1B[33mWARN \x1B[0m",  // Yellow
            Level::Info => "\x1B[32mINFO \x1B[0m",  // Green
            Level::Debug => "\x1B[36mDEBUG\x1B[0m", // Cyan
            Level::Trace => "\x1B[90mTRACE\x1B[0m", // Gray
        };

        let module = record.module_path().unwrap_or("<unknown>");
        let file_info = format!(
            "{}:{}",
            record.file().unwrap_or("<unknown>"),
            record.line().unwrap_or(0)
        );

        if self.console_output {
            let console_entry = format!(
                "[{}] {} [{}] [{}] {}\n",
                timestamp,
                level_str,
                module,
                file_info,
                record.args()
            );
            let _ = io::stderr().write_all(console_entry.as_bytes());
        }

        if let Some(file) = &self.file {
            let file_entry = format!(
                "[{}] {} [{}] [{}] {}\n",
                timestamp,
                record.level(),
                module,
                file_info,
                record.args()
            );
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(file_entry.as_bytes());
                let _ = file.flush();
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }
}

/// Configure logging with the specified level and optionally a log file
///
/// Only the first call installs the logger; later calls return `Ok(())`.
pub fn configure_logging(
    level: LogLevel,
    log_file: Option<PathBuf>,
    console_output: bool,
) -> Result<(), String> {
    let mut result = Ok(());

    INIT_LOGGER.call_once(|| {
        let level_filter = LevelFilter::from(level);

        let file = if let Some(path) = log_file.clone() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        result = Err(format!("Failed to create log directory: {}", e));
                        return;
                    }
                }
            }

            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => Some(Mutex::new(file)),
                Err(e) => {
                    result = Err(format!("Failed to open log file: {}", e));
                    return;
                }
            }
        } else {
            None
        };

        let logger = Box::new(PairwatchLogger {
            file,
            level: level_filter,
            console_output,
        });

        if let Err(e) = log::set_boxed_logger(logger) {
            result = Err(format!("Failed to set logger: {}", e));
            return;
        }

        log::set_max_level(level_filter);

        log::info!("Logging initialized at level: {}", level);
        if let Some(path) = log_file {
            log::info!("Log file: {}", path.display());
        }
    });

    result
}

/// Set global debug flags for selective logging
pub fn set_debug_flags(flags: DebugFlags) {
    if let Ok(mut debug_flags) = DEBUG_FLAGS.write() {
        *debug_flags = flags;
    }
}

/// Check if debug output for a module path is switched on
pub fn should_log_debug(module_path: &str) -> bool {
    match DEBUG_FLAGS.read() {
        Ok(flags) => DebugCategory::from_module_path(module_path).enabled_in(&flags),
        Err(_) => false,
    }
}

/// Log an error with context
pub fn log_error<E: Debug>(error: &E, context: &ErrorContext) {
    let metadata = if context.metadata.is_empty() {
        String::new()
    } else {
        let mut pairs = context
            .metadata
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>();
        pairs.sort();
        format!(" | {}", pairs.join(", "))
    };

    log::error!(
        "[{}::{}] Error: {:?}{}",
        context.component,
        context.operation,
        error,
        metadata
    );

    if let Some(msg) = &context.user_message {
        log::error!(
            "[{}::{}] User message: {}",
            context.component,
            context.operation,
            msg
        );
    }
}

/// Helper for performance logging
pub struct PerformanceLogger {
    /// Operation being timed
    operation: String,
    /// Component performing the operation
    component: String,
    /// Start time
    start_time: std::time::Instant,
}

impl PerformanceLogger {
    /// Create a new performance logger
    pub fn new<S: Into<String>>(component: S, operation: S) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            start_time: std::time::Instant::now(),
        }
    }

    /// Finish timing and log result
    pub fn finish(self) {
        log::debug!(
            "[{}::{}] Operation completed in {:?}",
            self.component,
            self.operation,
            self.start_time.elapsed()
        );
    }
}
