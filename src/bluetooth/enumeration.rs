//! Interfaces of the external subsystems the discovery engine drives
//!
//! The enumeration subsystem reports device presence through callback
//! channels registered on a watcher handle. The status subsystem resolves a
//! live handle per device that reports connection changes. Both deliver on
//! arbitrary threads.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::EnumerationError;

/// Display name property
pub const PROP_DISPLAY_NAME: &str = "System.ItemNameDisplay";

/// Paired flag property
pub const PROP_IS_PAIRED: &str = "System.Devices.Aep.IsPaired";

/// Class-of-device bitfield property
pub const PROP_CLASS_OF_DEVICE: &str = "System.Devices.Aep.Bluetooth.ClassOfDevice";

/// Properties requested from every watcher
pub const REQUESTED_PROPERTIES: [&str; 2] = [PROP_DISPLAY_NAME, PROP_IS_PAIRED];

/// Protocol identifier of classic Bluetooth endpoints
pub const BLUETOOTH_PROTOCOL_ID: Uuid = Uuid::from_u128(0xe0ae54ac_77a4_463e_adeb_c03ad04f7576);

/// Filter matching Bluetooth endpoints by protocol only
///
/// Pairing is requested as a property instead of a filter term; some
/// platforms reject compound filters.
pub fn bluetooth_protocol_filter() -> String {
    format!(
        "System.Devices.Aep.ProtocolId:=\"{{{}}}\"",
        BLUETOOTH_PROTOCOL_ID.hyphenated()
    )
}

/// Kind of object a watcher enumerates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceInformationKind {
    Device,
    AssociationEndpoint,
}

/// A property value reported by the subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    UInt32(u32),
    Text(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::UInt32(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

/// A device as first reported by the subsystem
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInformation {
    pub id: String,
    pub name: String,
    pub properties: HashMap<String, PropertyValue>,
}

impl DeviceInformation {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: PropertyValue) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }
}

/// A change to a device already reported by the subsystem
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInformationUpdate {
    pub id: String,
    pub properties: HashMap<String, PropertyValue>,
}

impl DeviceInformationUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: PropertyValue) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }
}

/// Why a watcher halted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// A stop was requested
    Requested,
    /// The subsystem gave up on its own
    Aborted(String),
}

/// A raw callback from the enumeration subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawWatcherEvent {
    Added(DeviceInformation),
    Removed(DeviceInformationUpdate),
    Updated(DeviceInformationUpdate),
    EnumerationCompleted,
    Stopped(HaltReason),
}

/// Callback channels a watcher handle offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackChannel {
    DeviceDiscovered,
    DeviceLost,
    DeviceChanged,
    EnumerationSettled,
    WatcherHalted,
}

impl CallbackChannel {
    pub const ALL: [CallbackChannel; 5] = [
        CallbackChannel::DeviceDiscovered,
        CallbackChannel::DeviceLost,
        CallbackChannel::DeviceChanged,
        CallbackChannel::EnumerationSettled,
        CallbackChannel::WatcherHalted,
    ];

    /// Channel an event is delivered on
    pub fn of(event: &RawWatcherEvent) -> Self {
        match event {
            RawWatcherEvent::Added(_) => Self::DeviceDiscovered,
            RawWatcherEvent::Removed(_) => Self::DeviceLost,
            RawWatcherEvent::Updated(_) => Self::DeviceChanged,
            RawWatcherEvent::EnumerationCompleted => Self::EnumerationSettled,
            RawWatcherEvent::Stopped(_) => Self::WatcherHalted,
        }
    }
}

/// Receiver of raw callbacks, invoked on any thread
pub type RawEventSink = Arc<dyn Fn(RawWatcherEvent) + Send + Sync>;

/// Identifies one callback registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken(pub u64);

/// Creates watchers
pub trait EnumerationService: Send + Sync {
    type Handle: WatcherHandle;

    fn create_watcher(
        &self,
        filter: &str,
        requested_properties: &[&str],
        kind: DeviceInformationKind,
    ) -> Result<Self::Handle, EnumerationError>;
}

/// A watcher created by the enumeration subsystem
pub trait WatcherHandle: Send + Sync + 'static {
    fn register(
        &self,
        channel: CallbackChannel,
        sink: RawEventSink,
    ) -> Result<RegistrationToken, EnumerationError>;

    fn unregister(&self, token: RegistrationToken);

    /// Begin enumeration; returning `Ok` acknowledges the start
    fn start(&self) -> Result<(), EnumerationError>;

    /// Request a halt; completion is reported on [`CallbackChannel::WatcherHalted`]
    fn stop(&self) -> Result<(), EnumerationError>;
}

/// Callback bookkeeping shared by watcher handle implementations
#[derive(Default)]
pub struct CallbackRegistry {
    next_token: AtomicU64,
    entries: Mutex<Vec<(RegistrationToken, CallbackChannel, RawEventSink)>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: CallbackChannel, sink: RawEventSink) -> RegistrationToken {
        let token = RegistrationToken(self.next_token.fetch_add(1, Ordering::Relaxed) + 1);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((token, channel, sink));
        token
    }

    pub fn unregister(&self, token: RegistrationToken) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(t, _, _)| *t != token);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every sink registered on its channel
    ///
    /// Sinks are called outside the registry lock so they may re-enter it.
    pub fn dispatch(&self, event: RawWatcherEvent) {
        let channel = CallbackChannel::of(&event);
        let sinks: Vec<RawEventSink> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, c, _)| *c == channel)
            .map(|(_, _, sink)| Arc::clone(sink))
            .collect();

        for sink in sinks {
            sink(event.clone());
        }
    }
}

/// Connection state reported by a live status handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Receiver of connection changes, invoked on any thread
pub type LinkStateSink = Arc<dyn Fn(LinkState) + Send + Sync>;

/// Subscription to a handle's change notifications
///
/// Unsubscribes when cancelled or dropped, whichever happens first.
pub struct StatusSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl StatusSubscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for StatusSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A resolved per-device connection handle
#[async_trait]
pub trait LiveStatusHandle: Send + Sync {
    /// Current connection state
    async fn link_state(&self) -> Result<LinkState, EnumerationError>;

    /// Subscribe to connection changes
    fn subscribe(&self, sink: LinkStateSink) -> StatusSubscription;
}

/// Outcome of resolving a status handle
pub enum Resolution {
    Resolved(Box<dyn LiveStatusHandle>),
    /// The subsystem could not produce a handle
    Unavailable,
    /// Resolution failed unexpectedly
    Error(String),
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(_) => write!(f, "Resolved(<handle>)"),
            Self::Unavailable => write!(f, "Unavailable"),
            Self::Error(msg) => write!(f, "Error({})", msg),
        }
    }
}

/// Resolves live status handles by device id
#[async_trait]
pub trait StatusResolver: Send + Sync {
    async fn resolve(&self, id: &str) -> Resolution;
}
