//! Settings files driving the discovery stack

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use pairwatch::config::{AppConfig, LogLevel};
use pairwatch::DeviceManager;

use common::{FakeEnumeration, FakeResolver};

#[tokio::test]
async fn test_saved_filter_reaches_watcher() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("settings.json");

    let mut config = AppConfig::default();
    config.log_level = LogLevel::Debug;
    config.discovery.protocol_filter = "System.Devices.Aep.ProtocolId:=\"{custom}\"".to_string();
    config.save_to(&path).unwrap();

    let loaded = AppConfig::load_from(&path).unwrap();
    assert_eq!(loaded, config);

    let fake = FakeEnumeration::new();
    let (manager, _rx) = DeviceManager::new(&loaded, fake.clone(), Arc::new(FakeResolver::new()));
    manager.start().unwrap();
    assert_eq!(
        fake.last_filter().as_deref(),
        Some("System.Devices.Aep.ProtocolId:=\"{custom}\"")
    );

    manager.shutdown().await;
}
