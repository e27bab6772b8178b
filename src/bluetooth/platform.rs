//! btleplug-backed enumeration and status subsystems
//!
//! btleplug has no notion of a persistent device watcher, so one is built
//! from a scan task: advertisements become added/updated callbacks, devices
//! not heard from within the lost timeout are reported removed, and the
//! initial enumeration is considered settled after a fixed delay. Connected
//! peripherals often stop advertising, so they are never swept.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bluetooth::enumeration::{
    CallbackChannel, CallbackRegistry, DeviceInformation, DeviceInformationKind,
    DeviceInformationUpdate, EnumerationService, HaltReason, LinkState, LinkStateSink,
    LiveStatusHandle, PropertyValue, RawEventSink, RawWatcherEvent, RegistrationToken,
    Resolution, StatusResolver, StatusSubscription, WatcherHandle, PROP_CLASS_OF_DEVICE,
    PROP_DISPLAY_NAME, PROP_IS_PAIRED,
};
use crate::config::DiscoveryConfig;
use crate::errors::{EnumerationError, ErrorContext};

/// Open the first Bluetooth adapter on the system
pub async fn open_default_adapter() -> Result<Adapter, EnumerationError> {
    let ctx = ErrorContext::new("platform", "open_default_adapter");
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    debug!("{}Found {} adapters", ctx, adapters.len());
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| EnumerationError::CreateFailed("No Bluetooth adapter found".to_string()))
}

/// What the scan task reports and how
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScanOptions {
    assume_paired: bool,
    include_name: bool,
    include_paired: bool,
    lost_timeout: Duration,
    settle_delay: Duration,
}

impl ScanOptions {
    fn new(settings: &DiscoveryConfig, requested_properties: &[&str]) -> Self {
        Self {
            assume_paired: settings.assume_paired,
            include_name: requested_properties.contains(&PROP_DISPLAY_NAME),
            include_paired: requested_properties.contains(&PROP_IS_PAIRED),
            lost_timeout: settings.lost_timeout(),
            settle_delay: settings.settle_delay(),
        }
    }

    fn sweep_period(&self) -> Duration {
        (self.lost_timeout / 2).max(Duration::from_secs(1))
    }
}

/// Enumeration subsystem over a btleplug adapter
pub struct BtleplugEnumeration {
    adapter: Arc<Adapter>,
    settings: DiscoveryConfig,
}

impl BtleplugEnumeration {
    pub fn new(adapter: Arc<Adapter>, settings: DiscoveryConfig) -> Self {
        Self { adapter, settings }
    }
}

impl EnumerationService for BtleplugEnumeration {
    type Handle = BtleplugWatcher;

    fn create_watcher(
        &self,
        filter: &str,
        requested_properties: &[&str],
        kind: DeviceInformationKind,
    ) -> Result<Self::Handle, EnumerationError> {
        if filter.trim().is_empty() {
            return Err(EnumerationError::CreateFailed(
                "Filter expression is empty".to_string(),
            ));
        }
        // btleplug scans every advertising device; the filter is not applied
        debug!("Creating btleplug watcher ({:?}, filter {})", kind, filter);

        Ok(BtleplugWatcher {
            adapter: Arc::clone(&self.adapter),
            options: ScanOptions::new(&self.settings, requested_properties),
            callbacks: Arc::new(CallbackRegistry::new()),
            scan: Mutex::new(None),
        })
    }
}

struct ScanTask {
    cancel: Sender<()>,
    task: JoinHandle<()>,
}

/// Watcher handle driving a btleplug scan task
pub struct BtleplugWatcher {
    adapter: Arc<Adapter>,
    options: ScanOptions,
    callbacks: Arc<CallbackRegistry>,
    scan: Mutex<Option<ScanTask>>,
}

impl WatcherHandle for BtleplugWatcher {
    fn register(
        &self,
        channel: CallbackChannel,
        sink: RawEventSink,
    ) -> Result<RegistrationToken, EnumerationError> {
        Ok(self.callbacks.register(channel, sink))
    }

    fn unregister(&self, token: RegistrationToken) {
        self.callbacks.unregister(token);
    }

    fn start(&self) -> Result<(), EnumerationError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EnumerationError::StartFailed(e.to_string()))?;

        let mut scan = self.scan.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = scan.as_ref() {
            if !existing.task.is_finished() {
                debug!("Scan task already running");
                return Ok(());
            }
        }

        let (cancel_tx, cancel_rx) = channel(1);
        let task = runtime.spawn(run_scan(
            Arc::clone(&self.adapter),
            self.options.clone(),
            Arc::clone(&self.callbacks),
            cancel_rx,
        ));
        *scan = Some(ScanTask {
            cancel: cancel_tx,
            task,
        });
        Ok(())
    }

    fn stop(&self) -> Result<(), EnumerationError> {
        let scan = self.scan.lock().unwrap_or_else(PoisonError::into_inner).take();
        match scan {
            Some(scan) => {
                if scan.cancel.try_send(()).is_err() {
                    // Task already gone; confirm the halt ourselves
                    debug!("Scan task already terminated");
                    self.callbacks
                        .dispatch(RawWatcherEvent::Stopped(HaltReason::Requested));
                }
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for BtleplugWatcher {
    fn drop(&mut self) {
        if let Some(scan) = self.scan.lock().unwrap_or_else(PoisonError::into_inner).take() {
            scan.task.abort();
        }
    }
}

/// A device the scan task has reported
#[derive(Debug, Clone)]
struct SeenDevice {
    address: String,
    name: String,
    last_seen: Instant,
    connected: bool,
}

async fn run_scan(
    adapter: Arc<Adapter>,
    options: ScanOptions,
    callbacks: Arc<CallbackRegistry>,
    mut cancel_rx: Receiver<()>,
) {
    let ctx = ErrorContext::new("BtleplugWatcher", "scan_task");

    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            warn!("{}Failed to get event stream: {}", ctx, e);
            callbacks.dispatch(RawWatcherEvent::Stopped(HaltReason::Aborted(e.to_string())));
            return;
        }
    };

    if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
        warn!("{}Failed to start scan: {}", ctx, e);
        callbacks.dispatch(RawWatcherEvent::Stopped(HaltReason::Aborted(e.to_string())));
        return;
    }
    info!("{}Bluetooth scan started", ctx);

    let mut seen: HashMap<PeripheralId, SeenDevice> = HashMap::new();
    let settle = tokio::time::sleep(options.settle_delay);
    tokio::pin!(settle);
    let mut settled = false;
    let mut sweep = tokio::time::interval(options.sweep_period());

    let reason = loop {
        tokio::select! {
            _ = cancel_rx.recv() => break HaltReason::Requested,
            _ = &mut settle, if !settled => {
                settled = true;
                callbacks.dispatch(RawWatcherEvent::EnumerationCompleted);
            }
            _ = sweep.tick() => {
                for address in sweep_lost(&mut seen, Instant::now(), options.lost_timeout) {
                    debug!("{}Device {} not seen for {:?}", ctx, address, options.lost_timeout);
                    callbacks.dispatch(RawWatcherEvent::Removed(DeviceInformationUpdate::new(address)));
                }
            }
            event = events.next() => match event {
                Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                    observe(&adapter, id, &mut seen, &options, &callbacks).await;
                }
                Some(CentralEvent::DeviceConnected(id)) => {
                    observe(&adapter, id.clone(), &mut seen, &options, &callbacks).await;
                    mark_link(&mut seen, &id, true, Instant::now());
                }
                Some(CentralEvent::DeviceDisconnected(id)) => {
                    mark_link(&mut seen, &id, false, Instant::now());
                }
                Some(_) => {}
                None => break HaltReason::Aborted("Adapter event stream ended".to_string()),
            }
        }
    };

    if let Err(e) = adapter.stop_scan().await {
        warn!("{}Failed to stop scan: {}", ctx, e);
    }
    info!("{}Bluetooth scan stopped ({:?})", ctx, reason);
    callbacks.dispatch(RawWatcherEvent::Stopped(reason));
}

/// Report a peripheral as added on first sight, or as updated when its name changes
async fn observe(
    adapter: &Adapter,
    id: PeripheralId,
    seen: &mut HashMap<PeripheralId, SeenDevice>,
    options: &ScanOptions,
    callbacks: &CallbackRegistry,
) {
    let peripheral = match adapter.peripheral(&id).await {
        Ok(peripheral) => peripheral,
        Err(e) => {
            debug!("Peripheral {:?} vanished: {}", id, e);
            return;
        }
    };
    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        Ok(None) => return,
        Err(e) => {
            debug!("Failed to read properties of {:?}: {}", id, e);
            return;
        }
    };
    let name = properties.local_name.unwrap_or_default();

    match seen.get_mut(&id) {
        Some(entry) => {
            entry.last_seen = Instant::now();
            if options.include_name && !name.is_empty() && name != entry.name {
                entry.name = name.clone();
                callbacks.dispatch(RawWatcherEvent::Updated(
                    DeviceInformationUpdate::new(entry.address.clone())
                        .with_property(PROP_DISPLAY_NAME, PropertyValue::Text(name)),
                ));
            }
        }
        None => {
            let address = properties.address.to_string();
            let info = device_information(&address, &name, properties.class, options);
            seen.insert(
                id,
                SeenDevice {
                    address,
                    name,
                    last_seen: Instant::now(),
                    connected: false,
                },
            );
            callbacks.dispatch(RawWatcherEvent::Added(info));
        }
    }
}

fn device_information(
    address: &str,
    name: &str,
    class: Option<u32>,
    options: &ScanOptions,
) -> DeviceInformation {
    let mut info = DeviceInformation::new(address, name);
    if options.include_name && !name.is_empty() {
        info = info.with_property(PROP_DISPLAY_NAME, PropertyValue::Text(name.to_string()));
    }
    if options.include_paired {
        info = info.with_property(PROP_IS_PAIRED, PropertyValue::Bool(options.assume_paired));
    }
    if let Some(class) = class {
        info = info.with_property(PROP_CLASS_OF_DEVICE, PropertyValue::UInt32(class));
    }
    info
}

/// Record a connect or disconnect as a sighting
fn mark_link<K: Eq + Hash>(
    seen: &mut HashMap<K, SeenDevice>,
    key: &K,
    connected: bool,
    now: Instant,
) {
    if let Some(device) = seen.get_mut(key) {
        device.connected = connected;
        device.last_seen = now;
    }
}

/// Forget unconnected devices not seen within `timeout`, returning their addresses
fn sweep_lost<K: Eq + Hash + Clone>(
    seen: &mut HashMap<K, SeenDevice>,
    now: Instant,
    timeout: Duration,
) -> Vec<String> {
    let lost: Vec<K> = seen
        .iter()
        .filter(|(_, device)| {
            !device.connected && now.saturating_duration_since(device.last_seen) >= timeout
        })
        .map(|(key, _)| key.clone())
        .collect();

    let mut addresses: Vec<String> = lost
        .iter()
        .filter_map(|key| seen.remove(key))
        .map(|device| device.address)
        .collect();
    addresses.sort();
    addresses
}

/// Resolves live status handles by peripheral address
pub struct BtleplugStatusResolver {
    adapter: Arc<Adapter>,
}

impl BtleplugStatusResolver {
    pub fn new(adapter: Arc<Adapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl StatusResolver for BtleplugStatusResolver {
    async fn resolve(&self, id: &str) -> Resolution {
        let peripherals = match self.adapter.peripherals().await {
            Ok(peripherals) => peripherals,
            Err(e) => return Resolution::Error(e.to_string()),
        };

        match peripherals.into_iter().find(|p| p.address().to_string() == id) {
            Some(peripheral) => Resolution::Resolved(Box::new(BtleplugLinkHandle {
                adapter: Arc::clone(&self.adapter),
                peripheral,
            })),
            None => {
                debug!("No peripheral with address {}", id);
                Resolution::Unavailable
            }
        }
    }
}

/// Connection state of one peripheral
struct BtleplugLinkHandle {
    adapter: Arc<Adapter>,
    peripheral: Peripheral,
}

#[async_trait]
impl LiveStatusHandle for BtleplugLinkHandle {
    async fn link_state(&self) -> Result<LinkState, EnumerationError> {
        if self.peripheral.is_connected().await? {
            Ok(LinkState::Connected)
        } else {
            Ok(LinkState::Disconnected)
        }
    }

    fn subscribe(&self, sink: LinkStateSink) -> StatusSubscription {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot watch {} without a runtime: {}", self.peripheral.address(), e);
                return StatusSubscription::new(|| {});
            }
        };

        let adapter = Arc::clone(&self.adapter);
        let target = self.peripheral.id();
        let task = runtime.spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Failed to get event stream for {:?}: {}", target, e);
                    return;
                }
            };
            while let Some(event) = events.next().await {
                match event {
                    CentralEvent::DeviceConnected(id) if id == target => sink(LinkState::Connected),
                    CentralEvent::DeviceDisconnected(id) if id == target => {
                        sink(LinkState::Disconnected)
                    }
                    _ => {}
                }
            }
        });

        StatusSubscription::new(move || task.abort())
    }
}
