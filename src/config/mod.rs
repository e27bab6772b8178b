//! Settings management

mod app_config;

pub use app_config::{default_settings_path, AppConfig, DebugFlags, DiscoveryConfig, LogLevel};

/// Trait for configurable components
pub trait Configurable {
    /// Apply configuration
    fn apply_config(&mut self, config: &AppConfig);
}
