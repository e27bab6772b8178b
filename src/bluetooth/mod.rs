//! Device discovery and live-state synchronization

pub mod class_decoder;
pub mod device;
pub mod enumeration;
pub mod events;
pub mod platform;
mod status_monitor;
mod sync;
mod watcher;

pub use class_decoder::decode;

pub use device::{
    device_count_text, nearby_device_count_text, CategoryTag, ChangedProperties,
    ConnectionStatus, DeviceRecord, DeviceSeed, DeviceSnapshot, FieldChange, StatusIndicator,
};

pub use enumeration::{
    EnumerationService, LiveStatusHandle, Resolution, StatusResolver, StatusSubscription,
    WatcherHandle,
};

pub use events::{
    receiver_to_stream, DiscoveryEvent, EventType, Intake, IntakeSender, ListNotification,
};

pub use platform::{open_default_adapter, BtleplugEnumeration, BtleplugStatusResolver};

pub use status_monitor::StatusMonitor;

pub use sync::{Disposition, IgnoreReason, SyncCoordinator};

pub use watcher::{changes_from_update, seed_from_information, DiscoveryWatcher, WatcherState};
