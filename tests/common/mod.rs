//! In-memory enumeration and status subsystems for headless testing
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use pairwatch::bluetooth::enumeration::{
    CallbackChannel, CallbackRegistry, DeviceInformation, DeviceInformationKind,
    DeviceInformationUpdate, EnumerationService, HaltReason, LinkState, LinkStateSink,
    LiveStatusHandle, PropertyValue, RawEventSink, RawWatcherEvent, RegistrationToken,
    Resolution, StatusResolver, StatusSubscription, WatcherHandle, PROP_CLASS_OF_DEVICE,
    PROP_DISPLAY_NAME, PROP_IS_PAIRED,
};
use pairwatch::bluetooth::ListNotification;
use pairwatch::errors::EnumerationError;

pub const WAIT: Duration = Duration::from_secs(2);

mock! {
    pub Resolver {}

    #[async_trait]
    impl StatusResolver for Resolver {
        async fn resolve(&self, id: &str) -> Resolution;
    }
}

/// Holds a subsystem start until the test lets it through
#[derive(Clone)]
struct StartGate {
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
}

#[derive(Default)]
struct FakeControl {
    created: AtomicUsize,
    fail_create: AtomicBool,
    fail_start: AtomicBool,
    manual_halt: AtomicBool,
    start_gate: Mutex<Option<StartGate>>,
    last_filter: Mutex<Option<String>>,
    watcher: Mutex<Option<Arc<FakeWatcherCore>>>,
}

/// Enumeration subsystem whose watcher is driven by the test
#[derive(Clone, Default)]
pub struct FakeEnumeration {
    control: Arc<FakeControl>,
}

impl FakeEnumeration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.control.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.control.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Hold halt confirmations until the test fires `Stopped`
    pub fn set_manual_halt(&self, manual: bool) {
        self.control.manual_halt.store(manual, Ordering::SeqCst);
    }

    /// Make the next subsystem start block until `release_start`
    pub fn hold_start(&self) {
        *self.control.start_gate.lock().unwrap() = Some(StartGate {
            entered: Arc::new(Barrier::new(2)),
            release: Arc::new(Barrier::new(2)),
        });
    }

    /// Block until a held start has reached the subsystem
    pub fn wait_start_entered(&self) {
        let gate = self.control.start_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.wait();
        }
    }

    pub fn release_start(&self) {
        let gate = self.control.start_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.release.wait();
        }
    }

    /// Number of watchers created
    pub fn created(&self) -> usize {
        self.control.created.load(Ordering::SeqCst)
    }

    pub fn last_filter(&self) -> Option<String> {
        self.control.last_filter.lock().unwrap().clone()
    }

    pub fn watcher(&self) -> Arc<FakeWatcherCore> {
        self.control
            .watcher
            .lock()
            .unwrap()
            .clone()
            .expect("no watcher created")
    }

    /// Raise a raw callback as the subsystem would
    pub fn fire(&self, event: RawWatcherEvent) {
        self.watcher().registry.dispatch(event);
    }
}

impl EnumerationService for FakeEnumeration {
    type Handle = FakeWatcher;

    fn create_watcher(
        &self,
        filter: &str,
        requested_properties: &[&str],
        kind: DeviceInformationKind,
    ) -> Result<Self::Handle, EnumerationError> {
        if self.control.fail_create.load(Ordering::SeqCst) {
            return Err(EnumerationError::CreateFailed("radio unavailable".to_string()));
        }
        assert_eq!(kind, DeviceInformationKind::Device);
        assert!(requested_properties.contains(&PROP_DISPLAY_NAME));
        assert!(requested_properties.contains(&PROP_IS_PAIRED));

        self.control.created.fetch_add(1, Ordering::SeqCst);
        *self.control.last_filter.lock().unwrap() = Some(filter.to_string());

        let core = Arc::new(FakeWatcherCore::default());
        *self.control.watcher.lock().unwrap() = Some(Arc::clone(&core));
        Ok(FakeWatcher {
            core,
            control: Arc::clone(&self.control),
        })
    }
}

/// Observable state of a fake watcher
#[derive(Default)]
pub struct FakeWatcherCore {
    pub registry: CallbackRegistry,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    running: AtomicBool,
}

impl FakeWatcherCore {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Whether the subsystem is scanning
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct FakeWatcher {
    core: Arc<FakeWatcherCore>,
    control: Arc<FakeControl>,
}

impl WatcherHandle for FakeWatcher {
    fn register(
        &self,
        channel: CallbackChannel,
        sink: RawEventSink,
    ) -> Result<RegistrationToken, EnumerationError> {
        Ok(self.core.registry.register(channel, sink))
    }

    fn unregister(&self, token: RegistrationToken) {
        self.core.registry.unregister(token);
    }

    fn start(&self) -> Result<(), EnumerationError> {
        if self.control.fail_start.load(Ordering::SeqCst) {
            return Err(EnumerationError::StartFailed("access denied".to_string()));
        }
        let gate = self.control.start_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.wait();
            gate.release.wait();
        }
        self.core.starts.fetch_add(1, Ordering::SeqCst);
        self.core.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), EnumerationError> {
        self.core.stops.fetch_add(1, Ordering::SeqCst);
        self.core.running.store(false, Ordering::SeqCst);
        if !self.control.manual_halt.load(Ordering::SeqCst) {
            self.core
                .registry
                .dispatch(RawWatcherEvent::Stopped(HaltReason::Requested));
        }
        Ok(())
    }
}

/// How the fake status subsystem answers for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOutcome {
    Link(LinkState),
    Unavailable,
    Error,
    /// Never completes
    Pending,
}

/// Connection state of one fake device
pub struct FakeLink {
    state: Mutex<LinkState>,
    sinks: Mutex<Vec<LinkStateSink>>,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl FakeLink {
    fn new(state: LinkState) -> Self {
        Self {
            state: Mutex::new(state),
            sinks: Mutex::new(Vec::new()),
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
        }
    }

    /// Change the state and notify every live subscriber
    pub fn set(&self, state: LinkState) {
        *self.state.lock().unwrap() = state;
        let sinks = self.sinks.lock().unwrap().clone();
        for sink in sinks {
            sink(state);
        }
    }

    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn live_sinks(&self) -> Vec<LinkStateSink> {
        self.sinks.lock().unwrap().clone()
    }
}

struct FakeLinkHandle {
    link: Arc<FakeLink>,
}

#[async_trait]
impl LiveStatusHandle for FakeLinkHandle {
    async fn link_state(&self) -> Result<LinkState, EnumerationError> {
        Ok(*self.link.state.lock().unwrap())
    }

    fn subscribe(&self, sink: LinkStateSink) -> StatusSubscription {
        self.link.subscribes.fetch_add(1, Ordering::SeqCst);
        self.link.sinks.lock().unwrap().push(sink);

        let link = Arc::clone(&self.link);
        StatusSubscription::new(move || {
            link.unsubscribes.fetch_add(1, Ordering::SeqCst);
            link.sinks.lock().unwrap().clear();
        })
    }
}

/// Status subsystem with per-device outcomes; unknown ids resolve disconnected
#[derive(Default)]
pub struct FakeResolver {
    outcomes: Mutex<HashMap<String, FakeOutcome>>,
    links: Mutex<HashMap<String, Arc<FakeLink>>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(self, id: &str, outcome: FakeOutcome) -> Self {
        self.outcomes.lock().unwrap().insert(id.to_string(), outcome);
        self
    }

    /// The link resolved for a device, once resolution has happened
    pub fn link(&self, id: &str) -> Option<Arc<FakeLink>> {
        self.links.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl StatusResolver for FakeResolver {
    async fn resolve(&self, id: &str) -> Resolution {
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(FakeOutcome::Link(LinkState::Disconnected));

        match outcome {
            FakeOutcome::Link(state) => {
                let link = Arc::clone(
                    self.links
                        .lock()
                        .unwrap()
                        .entry(id.to_string())
                        .or_insert_with(|| Arc::new(FakeLink::new(state))),
                );
                Resolution::Resolved(Box::new(FakeLinkHandle { link }))
            }
            FakeOutcome::Unavailable => Resolution::Unavailable,
            FakeOutcome::Error => Resolution::Error("status service crashed".to_string()),
            FakeOutcome::Pending => futures::future::pending().await,
        }
    }
}

/// A raw Added callback for a device
pub fn device_added(id: &str, name: &str, class_of_device: Option<u32>, paired: bool) -> RawWatcherEvent {
    let mut info = DeviceInformation::new(id, name)
        .with_property(PROP_IS_PAIRED, PropertyValue::Bool(paired));
    if let Some(cod) = class_of_device {
        info = info.with_property(PROP_CLASS_OF_DEVICE, PropertyValue::UInt32(cod));
    }
    RawWatcherEvent::Added(info)
}

pub fn device_removed(id: &str) -> RawWatcherEvent {
    RawWatcherEvent::Removed(DeviceInformationUpdate::new(id))
}

pub fn device_renamed(id: &str, name: &str) -> RawWatcherEvent {
    RawWatcherEvent::Updated(
        DeviceInformationUpdate::new(id)
            .with_property(PROP_DISPLAY_NAME, PropertyValue::Text(name.to_string())),
    )
}

/// Receive notifications until one matches, returning everything seen
pub async fn collect_until<F>(
    rx: &mut UnboundedReceiver<ListNotification>,
    mut done: F,
) -> Vec<ListNotification>
where
    F: FnMut(&ListNotification) -> bool,
{
    let mut seen = Vec::new();
    loop {
        match timeout(WAIT, rx.recv()).await {
            Ok(Some(notification)) => {
                let finished = done(&notification);
                seen.push(notification);
                if finished {
                    return seen;
                }
            }
            Ok(None) => panic!("notification channel closed; saw {:?}", seen),
            Err(_) => panic!("timed out waiting for notification; saw {:?}", seen),
        }
    }
}

/// Receive notifications up to and including the given notice
pub async fn collect_until_notice(
    rx: &mut UnboundedReceiver<ListNotification>,
    marker: &str,
) -> Vec<ListNotification> {
    collect_until(rx, |n| matches!(n, ListNotification::Notice(m) if m == marker)).await
}

/// Poll a condition until it holds
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let result = timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not reached in {:?}", WAIT);
}
