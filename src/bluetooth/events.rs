//! Events flowing into and out of the sync coordinator

use futures::Stream;
use log::debug;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::bluetooth::device::{
    ChangedProperties, ConnectionStatus, DeviceSeed, DeviceSnapshot, FieldChange,
};

/// Type of a normalized discovery event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Added,
    Removed,
    Updated,
}

/// A watcher callback normalized for the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A device appeared
    Added(DeviceSeed),
    /// A device disappeared
    Removed(String),
    /// Properties of a device changed
    Updated(String, ChangedProperties),
}

impl DiscoveryEvent {
    /// Get the type of this event
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Added(_) => EventType::Added,
            Self::Removed(_) => EventType::Removed,
            Self::Updated(..) => EventType::Updated,
        }
    }

    /// Id of the device this event is about
    pub fn device_id(&self) -> &str {
        match self {
            Self::Added(seed) => &seed.id,
            Self::Removed(id) => id,
            Self::Updated(id, _) => id,
        }
    }
}

/// One item of the coordinator's serialized intake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intake {
    /// Watcher event
    Discovery(DiscoveryEvent),
    /// Status monitor result, tagged with the monitor's generation
    StatusResolved {
        id: String,
        generation: u64,
        status: ConnectionStatus,
    },
    /// Status line for the consumer
    Notice(String),
    /// Release every monitor and empty the list
    Clear,
    /// Release every monitor and stop processing
    Shutdown,
}

/// Producer side of the intake; cheap to clone and usable from any thread
#[derive(Debug, Clone)]
pub struct IntakeSender {
    sender: UnboundedSender<Intake>,
}

impl IntakeSender {
    /// Create an intake channel
    pub fn channel() -> (Self, UnboundedReceiver<Intake>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue an item; returns `false` once the coordinator has gone away
    pub fn submit(&self, intake: Intake) -> bool {
        match self.sender.send(intake) {
            Ok(()) => true,
            Err(err) => {
                debug!("Intake closed, dropping {:?}", err.0);
                false
            }
        }
    }

    pub fn discovery(&self, event: DiscoveryEvent) -> bool {
        self.submit(Intake::Discovery(event))
    }

    pub fn status(&self, id: &str, generation: u64, status: ConnectionStatus) -> bool {
        self.submit(Intake::StatusResolved {
            id: id.to_string(),
            generation,
            status,
        })
    }

    pub fn notice(&self, message: impl Into<String>) -> bool {
        self.submit(Intake::Notice(message.into()))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Notification delivered to the presentation consumer, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListNotification {
    /// A record joined the list
    Added(DeviceSnapshot),
    /// A record left the list
    Removed(String),
    /// Fields of a record changed
    Changed { id: String, changes: Vec<FieldChange> },
    /// Number of records after the last processed event
    CountChanged(usize),
    /// Status line
    Notice(String),
}

/// A helper to create a Stream from a notification receiver
pub fn receiver_to_stream(
    mut rx: UnboundedReceiver<ListNotification>,
) -> impl Stream<Item = ListNotification> {
    async_stream::stream! {
        while let Some(notification) = rx.recv().await {
            yield notification;
        }
    }
}
