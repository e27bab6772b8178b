//! Device records held in the canonical list

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bluetooth::class_decoder;

/// Coarse device category derived from the class-of-device bitfield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CategoryTag {
    Computer,
    Phone,
    Headset,
    Speaker,
    AudioGeneric,
    Mouse,
    Keyboard,
    PeripheralGeneric,
    Watch,
    FitnessTracker,
    Generic,
}

impl CategoryTag {
    /// Human readable label
    pub fn label(self) -> &'static str {
        match self {
            Self::Computer => "Computer",
            Self::Phone => "Phone",
            Self::Headset => "Headset",
            Self::Speaker => "Speaker",
            Self::AudioGeneric => "Audio device",
            Self::Mouse => "Mouse",
            Self::Keyboard => "Keyboard",
            Self::PeripheralGeneric => "Peripheral",
            Self::Watch => "Watch",
            Self::FitnessTracker => "Fitness tracker",
            Self::Generic => "Bluetooth device",
        }
    }
}

impl Default for CategoryTag {
    fn default() -> Self {
        Self::Generic
    }
}

impl fmt::Display for CategoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Live connection status of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Unknown,
    Loading,
    Connected,
    Disconnected,
    Unavailable,
    Error,
}

/// Two-state indicator used to pick a status colour or icon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusIndicator {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    /// Human readable label
    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown status",
            Self::Loading => "Loading...",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::Unavailable => "Not available",
            Self::Error => "Error",
        }
    }

    /// Indicator derived from the status; only `Connected` lights up
    pub fn indicator(self) -> StatusIndicator {
        match self {
            Self::Connected => StatusIndicator::Connected,
            _ => StatusIndicator::Disconnected,
        }
    }

    /// Whether the monitor for this device has given up for good
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Unavailable | Self::Error)
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Loading
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the watcher knows about a device when it is first reported
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceSeed {
    /// Identity assigned by the enumeration subsystem
    pub id: String,
    /// Display name
    pub name: String,
    /// Class-of-device bitfield, if the subsystem supplied one
    pub class_of_device: Option<u32>,
    /// Paired flag at the time the device was reported
    pub is_paired: bool,
}

/// Properties carried by an update; absent fields are unchanged
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangedProperties {
    /// New display name
    pub display_name: Option<String>,
}

impl ChangedProperties {
    /// Whether the update carries nothing this list tracks
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
    }
}

/// A single field change on a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    DisplayName(String),
    ConnectionStatus(ConnectionStatus),
}

/// One entry in the canonical device list
///
/// The record's status monitor lives alongside it in the coordinator; the
/// record itself only carries the generation of that monitor so late results
/// from an earlier monitor can be told apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    id: String,
    display_name: String,
    class_of_device: Option<u32>,
    category: CategoryTag,
    is_paired: bool,
    connection_status: ConnectionStatus,
    monitor_generation: u64,
}

impl DeviceRecord {
    /// Build a record from a seed, decoding its category once
    pub fn from_seed(seed: DeviceSeed, monitor_generation: u64) -> Self {
        let category = class_decoder::decode(seed.class_of_device);
        Self {
            id: seed.id,
            display_name: seed.name,
            class_of_device: seed.class_of_device,
            category,
            is_paired: seed.is_paired,
            connection_status: ConnectionStatus::Loading,
            monitor_generation,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn class_of_device(&self) -> Option<u32> {
        self.class_of_device
    }

    pub fn category(&self) -> CategoryTag {
        self.category
    }

    pub fn is_paired(&self) -> bool {
        self.is_paired
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    pub fn monitor_generation(&self) -> u64 {
        self.monitor_generation
    }

    /// Apply changed properties, returning the fields that actually changed
    pub fn apply_changes(&mut self, changes: &ChangedProperties) -> Vec<FieldChange> {
        let mut applied = Vec::new();
        if let Some(name) = &changes.display_name {
            if *name != self.display_name {
                self.display_name = name.clone();
                applied.push(FieldChange::DisplayName(name.clone()));
            }
        }
        applied
    }

    /// Apply a status from the monitor
    ///
    /// Returns `false` when the status is unchanged or not allowed: `Loading`
    /// is never re-entered and terminal statuses are final.
    pub fn apply_status(&mut self, status: ConnectionStatus) -> bool {
        if status == self.connection_status || self.connection_status.is_terminal() {
            return false;
        }
        if status == ConnectionStatus::Loading {
            return false;
        }
        self.connection_status = status;
        true
    }

    /// Immutable copy for consumers
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            category: self.category,
            connection_status: self.connection_status,
        }
    }
}

/// Immutable view of a record handed to the presentation consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub display_name: String,
    pub category: CategoryTag,
    pub connection_status: ConnectionStatus,
}

impl DeviceSnapshot {
    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }

    pub fn indicator(&self) -> StatusIndicator {
        self.connection_status.indicator()
    }
}

impl fmt::Display for DeviceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} ({})",
            self.display_name, self.category, self.connection_status, self.id
        )
    }
}

/// Status line for the number of devices in the list
pub fn device_count_text(count: usize) -> String {
    format!("{} paired devices found.", count)
}

/// Status line for backends that cannot tell paired devices from nearby ones
pub fn nearby_device_count_text(count: usize) -> String {
    format!("{} nearby devices found.", count)
}
