//! Discovery watcher lifecycle against an in-memory enumeration subsystem

mod common;

use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;

use pairwatch::bluetooth::enumeration::{HaltReason, RawWatcherEvent};
use pairwatch::bluetooth::{
    ChangedProperties, DeviceSeed, DiscoveryEvent, DiscoveryWatcher, Intake, IntakeSender,
    WatcherState,
};
use pairwatch::config::{AppConfig, Configurable};
use pairwatch::errors::{EnumerationError, WatcherError};

use common::{device_added, device_removed, device_renamed, FakeEnumeration};

fn watcher() -> (
    DiscoveryWatcher<FakeEnumeration>,
    FakeEnumeration,
    tokio::sync::mpsc::UnboundedReceiver<Intake>,
) {
    let fake = FakeEnumeration::new();
    let (intake, rx) = IntakeSender::channel();
    (DiscoveryWatcher::new(fake.clone(), intake), fake, rx)
}

#[test]
fn test_start_is_idempotent() {
    let (watcher, fake, _rx) = watcher();
    assert_eq!(watcher.state(), WatcherState::Idle);
    assert!(!watcher.has_subscription());

    watcher.start().unwrap();
    watcher.start().unwrap();

    assert_eq!(watcher.state(), WatcherState::Running);
    assert_eq!(fake.created(), 1);
    assert_eq!(fake.watcher().starts(), 1);
    // One registration per callback channel
    assert_eq!(fake.watcher().registry.len(), 5);
}

#[test]
fn test_stop_is_idempotent() {
    let (watcher, fake, _rx) = watcher();

    // Stopping an idle watcher does nothing
    watcher.stop().unwrap();
    assert_eq!(watcher.state(), WatcherState::Idle);

    watcher.start().unwrap();
    watcher.stop().unwrap();
    assert_eq!(watcher.state(), WatcherState::Stopped);

    watcher.stop().unwrap();
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert_eq!(fake.watcher().stops(), 1);
}

#[test]
fn test_restart_reuses_subscription() {
    let (watcher, fake, _rx) = watcher();

    watcher.start().unwrap();
    watcher.stop().unwrap();
    watcher.start().unwrap();

    assert_eq!(watcher.state(), WatcherState::Running);
    assert_eq!(fake.created(), 1);
    assert_eq!(fake.watcher().starts(), 2);
    assert_eq!(fake.watcher().registry.len(), 5);
}

#[test]
fn test_halt_waits_for_confirmation() {
    let (watcher, fake, _rx) = watcher();
    fake.set_manual_halt(true);

    watcher.start().unwrap();
    watcher.stop().unwrap();
    assert_eq!(watcher.state(), WatcherState::Stopping);

    assert_eq!(
        watcher.start(),
        Err(WatcherError::InvalidTransition {
            state: WatcherState::Stopping,
            operation: "start",
        })
    );

    fake.fire(RawWatcherEvent::Stopped(HaltReason::Requested));
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert_eq!(fake.watcher().stops(), 1);
}

#[test]
fn test_stop_during_start_halts_subsystem() {
    let (watcher, fake, _rx) = watcher();
    let watcher = Arc::new(watcher);
    fake.hold_start();

    let starter = {
        let watcher = Arc::clone(&watcher);
        thread::spawn(move || watcher.start())
    };
    fake.wait_start_entered();
    assert_eq!(watcher.state(), WatcherState::Starting);

    watcher.stop().unwrap();
    fake.release_start();
    assert_eq!(starter.join().unwrap(), Ok(()));

    let core = fake.watcher();
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert!(!core.is_running());
    assert_eq!(core.starts(), 1);
    assert_eq!(core.stops(), 2);

    // The watcher can be started again normally
    watcher.start().unwrap();
    assert_eq!(watcher.state(), WatcherState::Running);
    assert!(core.is_running());
}

#[test]
fn test_dispose_during_start_halts_subsystem() {
    let (watcher, fake, _rx) = watcher();
    let watcher = Arc::new(watcher);
    fake.hold_start();

    let starter = {
        let watcher = Arc::clone(&watcher);
        thread::spawn(move || watcher.start())
    };
    fake.wait_start_entered();

    watcher.dispose();
    fake.release_start();
    assert_eq!(starter.join().unwrap(), Ok(()));

    let core = fake.watcher();
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert!(!core.is_running());
    assert!(core.registry.is_empty());
}

#[test]
fn test_subsystem_abort() {
    let (watcher, fake, _rx) = watcher();
    watcher.start().unwrap();

    fake.fire(RawWatcherEvent::Stopped(HaltReason::Aborted(
        "radio switched off".to_string(),
    )));
    assert_eq!(watcher.state(), WatcherState::Aborted);

    assert!(matches!(
        watcher.start(),
        Err(WatcherError::InvalidTransition {
            state: WatcherState::Aborted,
            ..
        })
    ));
    watcher.stop().unwrap();
    assert_eq!(fake.watcher().stops(), 0);
}

#[test]
fn test_construction_failure_stays_idle() {
    let (watcher, fake, _rx) = watcher();
    fake.set_fail_create(true);

    assert_eq!(
        watcher.start(),
        Err(WatcherError::Construction(EnumerationError::CreateFailed(
            "radio unavailable".to_string()
        )))
    );
    assert_eq!(watcher.state(), WatcherState::Idle);
    assert!(!watcher.has_subscription());

    fake.set_fail_create(false);
    watcher.start().unwrap();
    assert_eq!(watcher.state(), WatcherState::Running);
}

#[test]
fn test_start_failure_keeps_subscription() {
    let (watcher, fake, _rx) = watcher();
    fake.set_fail_start(true);

    assert!(matches!(
        watcher.start(),
        Err(WatcherError::Construction(EnumerationError::StartFailed(_)))
    ));
    assert_eq!(watcher.state(), WatcherState::Idle);

    fake.set_fail_start(false);
    watcher.start().unwrap();
    assert_eq!(fake.created(), 1);
    assert_eq!(fake.watcher().starts(), 1);
}

#[test]
fn test_dispose_releases_callbacks() {
    let (watcher, fake, _rx) = watcher();
    watcher.start().unwrap();
    let core = fake.watcher();

    watcher.dispose();
    watcher.dispose();

    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert!(core.registry.is_empty());
    assert_eq!(core.stops(), 1);
    assert!(!watcher.has_subscription());
    assert_eq!(watcher.start(), Err(WatcherError::Disposed));
}

#[test]
fn test_drop_disposes() {
    let (watcher, fake, _rx) = watcher();
    watcher.start().unwrap();
    let core = fake.watcher();

    drop(watcher);
    assert!(core.registry.is_empty());
}

#[test]
fn test_callbacks_are_normalized() {
    let (watcher, fake, mut rx) = watcher();
    watcher.start().unwrap();
    assert!(!watcher.enumeration_settled());

    fake.fire(device_added("A", "Headphones", Some(0x24_0404), true));
    fake.fire(device_renamed("A", "Studio headphones"));
    fake.fire(device_removed("A"));
    fake.fire(RawWatcherEvent::EnumerationCompleted);

    assert_eq!(
        rx.try_recv().unwrap(),
        Intake::Discovery(DiscoveryEvent::Added(DeviceSeed {
            id: "A".to_string(),
            name: "Headphones".to_string(),
            class_of_device: Some(0x24_0404),
            is_paired: true,
        }))
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        Intake::Discovery(DiscoveryEvent::Updated(
            "A".to_string(),
            ChangedProperties {
                display_name: Some("Studio headphones".to_string()),
            }
        ))
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        Intake::Discovery(DiscoveryEvent::Removed("A".to_string()))
    );
    assert!(rx.try_recv().is_err());
    assert!(watcher.enumeration_settled());
}

#[test]
fn test_filter_comes_from_config() {
    let (mut watcher, fake, _rx) = watcher();

    let mut config = AppConfig::default();
    config.discovery.protocol_filter = "System.Devices.Aep.ProtocolId:=\"{test}\"".to_string();
    watcher.apply_config(&config);
    watcher.start().unwrap();

    assert_eq!(
        fake.last_filter().as_deref(),
        Some("System.Devices.Aep.ProtocolId:=\"{test}\"")
    );
}

#[test]
fn test_default_filter_matches_protocol_only() {
    let (watcher, fake, _rx) = watcher();
    watcher.start().unwrap();

    let filter = fake.last_filter().unwrap();
    assert!(filter.starts_with("System.Devices.Aep.ProtocolId:="));
    assert!(!filter.contains("IsPaired"));
}
