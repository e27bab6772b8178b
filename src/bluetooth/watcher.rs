//! Discovery watcher lifecycle
//!
//! Owns the enumeration subscription, tracks the watcher state machine and
//! turns raw callbacks into [`DiscoveryEvent`]s on the coordinator's intake.
//! Callbacks may arrive on any thread; the watcher forwards them as they come
//! and leaves ordering to the intake.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::bluetooth::device::{ChangedProperties, DeviceSeed};
use crate::bluetooth::enumeration::{
    bluetooth_protocol_filter, CallbackChannel, DeviceInformation, DeviceInformationKind,
    DeviceInformationUpdate, EnumerationService, HaltReason, RawEventSink, RawWatcherEvent,
    RegistrationToken, WatcherHandle, PROP_CLASS_OF_DEVICE, PROP_DISPLAY_NAME, PROP_IS_PAIRED,
    REQUESTED_PROPERTIES,
};
use crate::bluetooth::events::{DiscoveryEvent, IntakeSender};
use crate::config::{AppConfig, Configurable};
use crate::errors::{EnumerationError, ErrorContext, WatcherError};
use crate::logging::log_error;

/// Watcher lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    /// The subsystem halted on its own
    Aborted,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State shared with the callback sink
struct WatcherShared {
    state: Mutex<WatcherState>,
    settled: AtomicBool,
}

impl WatcherShared {
    fn lock_state(&self) -> MutexGuard<'_, WatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move from `expected` to `next`, leaving any other state alone
    fn transition(&self, expected: WatcherState, next: WatcherState) -> bool {
        let mut state = self.lock_state();
        if *state == expected {
            *state = next;
            true
        } else {
            false
        }
    }

    fn on_halted(&self, reason: HaltReason) {
        let mut state = self.lock_state();
        let next = match (*state, &reason) {
            (WatcherState::Stopping, _) => WatcherState::Stopped,
            (WatcherState::Starting | WatcherState::Running, HaltReason::Aborted(msg)) => {
                warn!("Device watcher aborted: {}", msg);
                WatcherState::Aborted
            }
            (WatcherState::Starting | WatcherState::Running, HaltReason::Requested) => {
                warn!("Device watcher halted without a stop request");
                WatcherState::Stopped
            }
            (current, _) => {
                debug!("Ignoring halt ({:?}) while {}", reason, current);
                return;
            }
        };
        info!("Device watcher {} -> {}", *state, next);
        *state = next;
    }
}

/// The live subscription: the subsystem handle and its callback registrations
struct Subscription<H> {
    handle: Arc<H>,
    tokens: Vec<RegistrationToken>,
}

/// Watches the enumeration subsystem for Bluetooth devices
pub struct DiscoveryWatcher<S: EnumerationService> {
    service: S,
    filter: String,
    intake: IntakeSender,
    shared: Arc<WatcherShared>,
    subscription: Mutex<Option<Subscription<S::Handle>>>,
    disposed: AtomicBool,
}

impl<S: EnumerationService> DiscoveryWatcher<S> {
    /// Create an idle watcher feeding the given intake
    pub fn new(service: S, intake: IntakeSender) -> Self {
        Self {
            service,
            filter: bluetooth_protocol_filter(),
            intake,
            shared: Arc::new(WatcherShared {
                state: Mutex::new(WatcherState::Idle),
                settled: AtomicBool::new(false),
            }),
            subscription: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// Use a different filter expression for the subscription
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn state(&self) -> WatcherState {
        *self.shared.lock_state()
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Whether the subsystem reported the initial enumeration as complete
    pub fn enumeration_settled(&self) -> bool {
        self.shared.settled.load(Ordering::SeqCst)
    }

    /// Whether the subscription exists
    pub fn has_subscription(&self) -> bool {
        self.lock_subscription().is_some()
    }

    /// Start watching
    ///
    /// Valid from `Idle` or `Stopped`; a no-op while `Starting` or `Running`.
    /// The subscription is created on the first start and reused afterwards.
    pub fn start(&self) -> Result<(), WatcherError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(WatcherError::Disposed);
        }

        let previous = {
            let mut state = self.shared.lock_state();
            match *state {
                WatcherState::Idle | WatcherState::Stopped => {
                    let previous = *state;
                    *state = WatcherState::Starting;
                    previous
                }
                WatcherState::Starting | WatcherState::Running => {
                    info!("Device watcher already {}, ignoring start", *state);
                    return Ok(());
                }
                current => {
                    return Err(WatcherError::InvalidTransition {
                        state: current,
                        operation: "start",
                    })
                }
            }
        };

        let handle = match self.ensure_subscription() {
            Ok(handle) => handle,
            Err(e) => return Err(self.start_failed(previous, e)),
        };

        self.shared.settled.store(false, Ordering::SeqCst);
        debug!("Starting device watcher");
        if let Err(e) = handle.start() {
            return Err(self.start_failed(previous, e));
        }

        if self.shared.transition(WatcherState::Starting, WatcherState::Running) {
            info!("Device watcher running");
        } else {
            self.halt_after_interrupted_start(&handle);
        }
        Ok(())
    }

    /// A stop or dispose landed while the subsystem was starting
    ///
    /// Its halt reached the subsystem before the start did, so the subsystem
    /// is running again and has to be halted once more.
    fn halt_after_interrupted_start(&self, handle: &S::Handle) {
        {
            let mut state = self.shared.lock_state();
            match *state {
                WatcherState::Stopping => {}
                WatcherState::Stopped => *state = WatcherState::Stopping,
                current => {
                    debug!("Device watcher {} after start, leaving it", current);
                    return;
                }
            }
        }

        debug!("Device watcher stopped while starting, halting subsystem again");
        if let Err(e) = handle.stop() {
            log_error(&e, &ErrorContext::new("DiscoveryWatcher", "start"));
            self.shared.transition(WatcherState::Stopping, WatcherState::Stopped);
        }
        if self.disposed.load(Ordering::SeqCst) {
            self.shared.transition(WatcherState::Stopping, WatcherState::Stopped);
        }
    }

    /// Request a halt
    ///
    /// The watcher moves to `Stopping` now and to `Stopped` when the
    /// subsystem confirms. Harmless when not running.
    pub fn stop(&self) -> Result<(), WatcherError> {
        let previous = {
            let mut state = self.shared.lock_state();
            match *state {
                WatcherState::Starting | WatcherState::Running => {
                    let previous = *state;
                    *state = WatcherState::Stopping;
                    previous
                }
                current => {
                    debug!("Device watcher {}, nothing to stop", current);
                    return Ok(());
                }
            }
        };

        let handle = self.lock_subscription().as_ref().map(|s| Arc::clone(&s.handle));
        let Some(handle) = handle else {
            self.shared.transition(WatcherState::Stopping, WatcherState::Stopped);
            return Ok(());
        };

        debug!("Stopping device watcher");
        if let Err(e) = handle.stop() {
            self.shared.transition(WatcherState::Stopping, previous);
            log_error(&e, &ErrorContext::new("DiscoveryWatcher", "stop"));
            return Err(WatcherError::Halt(e));
        }
        Ok(())
    }

    /// Stop, unregister every callback and release the subscription
    ///
    /// Later calls do nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.stop() {
            warn!("Stop during dispose failed: {}", e);
        }

        if let Some(subscription) = self.lock_subscription().take() {
            for token in &subscription.tokens {
                subscription.handle.unregister(*token);
            }
            debug!(
                "Released device watcher subscription ({} callbacks)",
                subscription.tokens.len()
            );
        }

        // The halt confirmation can no longer arrive
        self.shared.transition(WatcherState::Stopping, WatcherState::Stopped);
        info!("Device watcher disposed");
    }

    fn lock_subscription(&self) -> MutexGuard<'_, Option<Subscription<S::Handle>>> {
        self.subscription.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_failed(&self, previous: WatcherState, error: EnumerationError) -> WatcherError {
        self.shared.transition(WatcherState::Starting, previous);
        log_error(
            &error,
            &ErrorContext::new("DiscoveryWatcher", "start")
                .with_metadata("filter", self.filter.clone())
                .with_user_message("Could not start searching for devices"),
        );
        WatcherError::Construction(error)
    }

    fn ensure_subscription(&self) -> Result<Arc<S::Handle>, EnumerationError> {
        let mut subscription = self.lock_subscription();
        if let Some(existing) = subscription.as_ref() {
            return Ok(Arc::clone(&existing.handle));
        }

        debug!("Creating device watcher with filter {}", self.filter);
        let handle = Arc::new(self.service.create_watcher(
            &self.filter,
            &REQUESTED_PROPERTIES,
            DeviceInformationKind::Device,
        )?);

        let sink = self.callback_sink();
        let mut tokens = Vec::with_capacity(CallbackChannel::ALL.len());
        for channel in CallbackChannel::ALL {
            match handle.register(channel, Arc::clone(&sink)) {
                Ok(token) => tokens.push(token),
                Err(e) => {
                    for token in tokens {
                        handle.unregister(token);
                    }
                    return Err(e);
                }
            }
        }

        debug!("Device watcher created with {} callbacks", tokens.len());
        *subscription = Some(Subscription {
            handle: Arc::clone(&handle),
            tokens,
        });
        Ok(handle)
    }

    fn callback_sink(&self) -> RawEventSink {
        let shared = Arc::clone(&self.shared);
        let intake = self.intake.clone();
        Arc::new(move |event| match event {
            RawWatcherEvent::Added(info) => {
                debug!("Device added: {} ({})", info.id, info.name);
                intake.discovery(DiscoveryEvent::Added(seed_from_information(info)));
            }
            RawWatcherEvent::Removed(update) => {
                debug!("Device removed: {}", update.id);
                intake.discovery(DiscoveryEvent::Removed(update.id));
            }
            RawWatcherEvent::Updated(update) => {
                debug!("Device updated: {}", update.id);
                let changes = changes_from_update(&update);
                intake.discovery(DiscoveryEvent::Updated(update.id, changes));
            }
            RawWatcherEvent::EnumerationCompleted => {
                info!("Device enumeration completed");
                shared.settled.store(true, Ordering::SeqCst);
            }
            RawWatcherEvent::Stopped(reason) => shared.on_halted(reason),
        })
    }
}

impl<S: EnumerationService> Configurable for DiscoveryWatcher<S> {
    /// The filter applies to the next subscription created
    fn apply_config(&mut self, config: &AppConfig) {
        self.filter = config.discovery.protocol_filter.clone();
    }
}

impl<S: EnumerationService> Drop for DiscoveryWatcher<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Build a seed from the properties of a newly reported device
pub fn seed_from_information(info: DeviceInformation) -> DeviceSeed {
    let is_paired = info
        .properties
        .get(PROP_IS_PAIRED)
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let class_of_device = info
        .properties
        .get(PROP_CLASS_OF_DEVICE)
        .and_then(|v| v.as_u32());
    let name = if info.name.is_empty() {
        info.properties
            .get(PROP_DISPLAY_NAME)
            .and_then(|v| v.as_text())
            .map(str::to_string)
            .unwrap_or_default()
    } else {
        info.name
    };

    DeviceSeed {
        id: info.id,
        name,
        class_of_device,
        is_paired,
    }
}

/// Extract the tracked properties from an update
pub fn changes_from_update(update: &DeviceInformationUpdate) -> ChangedProperties {
    ChangedProperties {
        display_name: update
            .properties
            .get(PROP_DISPLAY_NAME)
            .and_then(|v| v.as_text())
            .map(str::to_string),
    }
}
