//! Per-device connection status monitoring

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::bluetooth::device::ConnectionStatus;
use crate::bluetooth::enumeration::{
    LinkState, LinkStateSink, LiveStatusHandle, Resolution, StatusResolver, StatusSubscription,
};
use crate::bluetooth::events::IntakeSender;

impl From<LinkState> for ConnectionStatus {
    fn from(state: LinkState) -> Self {
        match state {
            LinkState::Connected => ConnectionStatus::Connected,
            LinkState::Disconnected => ConnectionStatus::Disconnected,
        }
    }
}

/// The resolved handle and its change subscription
struct ActiveHandle {
    // Dropped before the handle
    subscription: StatusSubscription,
    _handle: Box<dyn LiveStatusHandle>,
}

/// Resolves a device's live status handle and forwards its changes
///
/// Every status goes onto the coordinator's intake tagged with this
/// monitor's generation. After [`release`](Self::release) nothing more is
/// sent. A resolution that never completes leaves the device at `Loading`.
pub struct StatusMonitor {
    id: String,
    generation: u64,
    released: Arc<AtomicBool>,
    active: Arc<Mutex<Option<ActiveHandle>>>,
    task: Option<JoinHandle<()>>,
}

impl StatusMonitor {
    /// Start monitoring a device; must be called inside a Tokio runtime
    pub fn begin_monitoring(
        id: impl Into<String>,
        generation: u64,
        resolver: Arc<dyn StatusResolver>,
        intake: IntakeSender,
    ) -> Self {
        let id = id.into();
        let released = Arc::new(AtomicBool::new(false));
        let active = Arc::new(Mutex::new(None));

        intake.status(&id, generation, ConnectionStatus::Loading);

        let task = tokio::spawn(resolve_and_watch(
            id.clone(),
            generation,
            resolver,
            intake,
            Arc::clone(&released),
            Arc::clone(&active),
        ));

        Self {
            id,
            generation,
            released,
            active,
            task: Some(task),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Whether a live handle is currently subscribed
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Unsubscribe and release the handle
    ///
    /// Returns `false` if the monitor was already released.
    pub fn release(&mut self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }

        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(active) = active {
            active.subscription.cancel();
        }

        if let Some(task) = self.task.take() {
            task.abort();
        }

        debug!("Released status monitor for {} (generation {})", self.id, self.generation);
        true
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        self.release();
    }
}

async fn resolve_and_watch(
    id: String,
    generation: u64,
    resolver: Arc<dyn StatusResolver>,
    intake: IntakeSender,
    released: Arc<AtomicBool>,
    active: Arc<Mutex<Option<ActiveHandle>>>,
) {
    let resolution = AssertUnwindSafe(resolver.resolve(&id))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Resolution::Error("status resolver panicked".to_string()));

    if released.load(Ordering::SeqCst) {
        debug!("Status monitor for {} released during resolution", id);
        return;
    }

    let handle = match resolution {
        Resolution::Resolved(handle) => handle,
        Resolution::Unavailable => {
            warn!("No status handle available for {}", id);
            intake.status(&id, generation, ConnectionStatus::Unavailable);
            return;
        }
        Resolution::Error(msg) => {
            warn!("Status resolution for {} failed: {}", id, msg);
            intake.status(&id, generation, ConnectionStatus::Error);
            return;
        }
    };

    let initial = match AssertUnwindSafe(handle.link_state()).catch_unwind().await {
        Ok(Ok(state)) => ConnectionStatus::from(state),
        Ok(Err(e)) => {
            warn!("Reading status of {} failed: {}", id, e);
            intake.status(&id, generation, ConnectionStatus::Error);
            return;
        }
        Err(_) => {
            warn!("Reading status of {} panicked", id);
            intake.status(&id, generation, ConnectionStatus::Error);
            return;
        }
    };

    let sink: LinkStateSink = {
        let id = id.clone();
        let intake = intake.clone();
        let released = Arc::clone(&released);
        Arc::new(move |state: LinkState| {
            if released.load(Ordering::SeqCst) {
                return;
            }
            debug!("Status of {} changed to {:?}", id, state);
            intake.status(&id, generation, ConnectionStatus::from(state));
        })
    };

    // Checked under the lock so a concurrent release either sees the handle or we see the release
    let mut slot = active.lock().unwrap_or_else(PoisonError::into_inner);
    if released.load(Ordering::SeqCst) {
        return;
    }
    intake.status(&id, generation, initial);
    let subscription = handle.subscribe(sink);
    *slot = Some(ActiveHandle {
        subscription,
        _handle: handle,
    });
    debug!("Monitoring status of {} (generation {})", id, generation);
}
