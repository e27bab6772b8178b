// Root module exports
pub mod bluetooth;
pub mod config;
pub mod errors;
pub mod logging;
pub mod manager;

// Re-exports for convenience
pub use bluetooth::{
    ConnectionStatus, DeviceSnapshot, DiscoveryWatcher, ListNotification, StatusMonitor,
    SyncCoordinator, WatcherState,
};
pub use config::AppConfig;
pub use errors::{AppError, WatcherError};
pub use logging::configure_logging;
pub use manager::DeviceManager;
