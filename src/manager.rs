//! Device manager wiring discovery, synchronization and the presentation channel

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;

use crate::bluetooth::{
    DiscoveryWatcher, EnumerationService, Intake, IntakeSender, ListNotification,
    StatusResolver, SyncCoordinator, WatcherState,
};
use crate::config::{AppConfig, Configurable};
use crate::errors::WatcherError;
use crate::logging::PerformanceLogger;

/// How long a restart waits for the watcher to confirm its halt
const HALT_WAIT: Duration = Duration::from_secs(5);
const HALT_POLL: Duration = Duration::from_millis(25);

/// Owns the watcher and the coordinator task
///
/// Notifications for the presentation consumer arrive, in order, on the
/// receiver returned by [`DeviceManager::new`].
pub struct DeviceManager<S: EnumerationService> {
    watcher: DiscoveryWatcher<S>,
    intake: IntakeSender,
    coordinator: Option<JoinHandle<()>>,
}

impl<S: EnumerationService> DeviceManager<S> {
    /// Create the manager and spawn its coordinator; must be called inside a Tokio runtime
    pub fn new(
        config: &AppConfig,
        service: S,
        resolver: Arc<dyn StatusResolver>,
    ) -> (Self, UnboundedReceiver<ListNotification>) {
        let (notifier, notifications) = unbounded_channel();
        let (coordinator, intake) = SyncCoordinator::new(resolver, notifier);

        let mut watcher = DiscoveryWatcher::new(service, intake.clone());
        watcher.apply_config(config);

        let coordinator = coordinator.spawn();
        intake.notice("Initializing...");

        let manager = Self {
            watcher,
            intake,
            coordinator: Some(coordinator),
        };
        (manager, notifications)
    }

    pub fn watcher_state(&self) -> WatcherState {
        self.watcher.state()
    }

    pub fn enumeration_settled(&self) -> bool {
        self.watcher.enumeration_settled()
    }

    /// Producer handle onto the coordinator's intake
    pub fn intake(&self) -> IntakeSender {
        self.intake.clone()
    }

    /// Start searching for devices
    ///
    /// A failure is also reported to the consumer as a notice.
    pub fn start(&self) -> Result<(), WatcherError> {
        self.intake.notice("Searching for paired devices...");
        self.watcher.start().map_err(|e| {
            self.intake.notice(format!("Could not start device search: {}", e));
            e
        })
    }

    pub fn stop(&self) -> Result<(), WatcherError> {
        self.watcher.stop()
    }

    /// Drop every device from the list
    pub fn refresh(&self) {
        info!("Refreshing device list");
        self.intake.submit(Intake::Clear);
    }

    /// Clear the list and run the watcher again
    pub async fn restart_discovery(&self) -> Result<(), WatcherError> {
        let perf = PerformanceLogger::new("DeviceManager", "restart_discovery");
        self.refresh();
        self.watcher.stop()?;
        self.wait_for_halt().await;
        let result = self.start();
        perf.finish();
        result
    }

    /// Dispose the watcher and stop the coordinator once every monitor is released
    pub async fn shutdown(mut self) {
        info!("Shutting down device manager");
        self.watcher.dispose();
        self.intake.submit(Intake::Shutdown);

        if let Some(coordinator) = self.coordinator.take() {
            if let Err(e) = coordinator.await {
                warn!("Sync coordinator ended abnormally: {}", e);
            }
        }
    }

    async fn wait_for_halt(&self) {
        let halted = tokio::time::timeout(HALT_WAIT, async {
            while self.watcher.state() == WatcherState::Stopping {
                tokio::time::sleep(HALT_POLL).await;
            }
        })
        .await;

        if halted.is_err() {
            warn!("Device watcher did not confirm halt within {:?}", HALT_WAIT);
        }
    }
}

impl<S: EnumerationService> Drop for DeviceManager<S> {
    fn drop(&mut self) {
        if self.coordinator.is_some() {
            debug!("Device manager dropped without shutdown");
            self.watcher.dispose();
            self.intake.submit(Intake::Shutdown);
        }
    }
}
