//! The canonical device list and its single consumer
//!
//! Every change to the list goes through [`SyncCoordinator::apply`], called
//! one intake item at a time from [`SyncCoordinator::run`]. Producers (watcher
//! callbacks, status monitors) only ever enqueue; nothing else touches the
//! list, so no locking is needed around it.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::bluetooth::device::{
    ChangedProperties, ConnectionStatus, DeviceRecord, DeviceSeed, DeviceSnapshot, FieldChange,
};
use crate::bluetooth::enumeration::StatusResolver;
use crate::bluetooth::events::{DiscoveryEvent, Intake, IntakeSender, ListNotification};
use crate::bluetooth::status_monitor::StatusMonitor;

/// Why an intake item left the list untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Added for a device that is not paired
    Unpaired,
    /// Added for an id already in the list
    Duplicate,
    /// Removed, Updated or StatusResolved for an id not in the list
    UnknownDevice,
    /// Status from a monitor that no longer owns the record
    StaleStatus,
    /// Status not allowed from the record's current status
    RejectedStatus,
}

/// Result of applying one intake item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The list changed
    Applied,
    /// The item was valid but changed nothing
    Unchanged,
    /// The item was absorbed without effect
    Ignored(IgnoreReason),
    /// The coordinator released everything and stops
    Shutdown,
}

/// A record together with the monitor it owns
struct TrackedDevice {
    record: DeviceRecord,
    monitor: StatusMonitor,
}

/// Owns the canonical device list
pub struct SyncCoordinator {
    devices: Vec<TrackedDevice>,
    resolver: Arc<dyn StatusResolver>,
    intake: IntakeSender,
    receiver: UnboundedReceiver<Intake>,
    notifier: UnboundedSender<ListNotification>,
    next_generation: u64,
}

impl SyncCoordinator {
    /// Create a coordinator and the intake producers feed into
    pub fn new(
        resolver: Arc<dyn StatusResolver>,
        notifier: UnboundedSender<ListNotification>,
    ) -> (Self, IntakeSender) {
        let (intake, receiver) = IntakeSender::channel();
        let coordinator = Self {
            devices: Vec::new(),
            resolver,
            intake: intake.clone(),
            receiver,
            notifier,
            next_generation: 0,
        };
        (coordinator, intake)
    }

    /// Another producer handle for the intake
    pub fn intake(&self) -> IntakeSender {
        self.intake.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&DeviceRecord> {
        self.position(id).map(|idx| &self.devices[idx].record)
    }

    /// Snapshots of every record, in insertion order
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.devices.iter().map(|d| d.record.snapshot()).collect()
    }

    /// Process intake items until shutdown
    pub async fn run(mut self) {
        info!("Sync coordinator running");
        while let Some(item) = self.receiver.recv().await {
            if self.apply(item) == Disposition::Shutdown {
                break;
            }
        }
        self.release_all();
        info!("Sync coordinator stopped");
    }

    /// Run on a Tokio task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Apply one intake item to completion, then publish the device count
    pub fn apply(&mut self, item: Intake) -> Disposition {
        let disposition = match item {
            Intake::Discovery(DiscoveryEvent::Added(seed)) => self.on_added(seed),
            Intake::Discovery(DiscoveryEvent::Removed(id)) => self.on_removed(&id),
            Intake::Discovery(DiscoveryEvent::Updated(id, changes)) => {
                self.on_updated(&id, &changes)
            }
            Intake::StatusResolved {
                id,
                generation,
                status,
            } => self.on_status(&id, generation, status),
            Intake::Notice(message) => {
                self.notify(ListNotification::Notice(message));
                Disposition::Applied
            }
            Intake::Clear => {
                info!("Clearing {} devices", self.devices.len());
                self.release_all();
                Disposition::Applied
            }
            Intake::Shutdown => {
                info!("Sync coordinator shutting down");
                self.release_all();
                Disposition::Shutdown
            }
        };

        self.notify(ListNotification::CountChanged(self.devices.len()));
        disposition
    }

    fn on_added(&mut self, seed: DeviceSeed) -> Disposition {
        if !seed.is_paired {
            debug!("Skipping unpaired device {} ({})", seed.id, seed.name);
            return Disposition::Ignored(IgnoreReason::Unpaired);
        }
        if self.contains(&seed.id) {
            debug!("Device {} already in list, skipping duplicate add", seed.id);
            return Disposition::Ignored(IgnoreReason::Duplicate);
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let record = DeviceRecord::from_seed(seed, generation);
        let snapshot = record.snapshot();
        info!("Adding paired device {} ({})", snapshot.display_name, snapshot.id);

        let monitor = StatusMonitor::begin_monitoring(
            record.id(),
            generation,
            Arc::clone(&self.resolver),
            self.intake.clone(),
        );
        self.devices.push(TrackedDevice { record, monitor });
        self.notify(ListNotification::Added(snapshot));
        Disposition::Applied
    }

    fn on_removed(&mut self, id: &str) -> Disposition {
        let Some(idx) = self.position(id) else {
            debug!("Removal for unknown device {}", id);
            return Disposition::Ignored(IgnoreReason::UnknownDevice);
        };

        self.devices[idx].monitor.release();
        let removed = self.devices.remove(idx);
        info!("Removed device {} ({})", removed.record.display_name(), id);
        self.notify(ListNotification::Removed(id.to_string()));
        Disposition::Applied
    }

    fn on_updated(&mut self, id: &str, changes: &ChangedProperties) -> Disposition {
        let Some(idx) = self.position(id) else {
            debug!("Update for unknown device {}", id);
            return Disposition::Ignored(IgnoreReason::UnknownDevice);
        };

        let applied = self.devices[idx].record.apply_changes(changes);
        if applied.is_empty() {
            return Disposition::Unchanged;
        }
        debug!("Updated device {}: {:?}", id, applied);
        self.notify(ListNotification::Changed {
            id: id.to_string(),
            changes: applied,
        });
        Disposition::Applied
    }

    fn on_status(&mut self, id: &str, generation: u64, status: ConnectionStatus) -> Disposition {
        let Some(idx) = self.position(id) else {
            debug!("Status {:?} for unknown device {}", status, id);
            return Disposition::Ignored(IgnoreReason::UnknownDevice);
        };

        let record = &mut self.devices[idx].record;
        if record.monitor_generation() != generation {
            debug!(
                "Stale status {:?} for {} (generation {} != {})",
                status,
                id,
                generation,
                record.monitor_generation()
            );
            return Disposition::Ignored(IgnoreReason::StaleStatus);
        }

        if record.connection_status() == status {
            return Disposition::Unchanged;
        }
        if !record.apply_status(status) {
            debug!(
                "Status {:?} rejected for {} while {:?}",
                status,
                id,
                record.connection_status()
            );
            return Disposition::Ignored(IgnoreReason::RejectedStatus);
        }

        debug!("Device {} is now {:?}", id, status);
        self.notify(ListNotification::Changed {
            id: id.to_string(),
            changes: vec![FieldChange::ConnectionStatus(status)],
        });
        Disposition::Applied
    }

    /// Release every monitor, then drop its record
    fn release_all(&mut self) {
        for mut tracked in std::mem::take(&mut self.devices) {
            tracked.monitor.release();
            self.notify(ListNotification::Removed(tracked.record.id().to_string()));
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.record.id() == id)
    }

    fn notify(&self, notification: ListNotification) {
        if self.notifier.send(notification).is_err() {
            debug!("Presentation consumer gone, dropping notification");
        }
    }
}
