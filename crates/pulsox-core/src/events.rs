//! Device event system for connection and reading notifications.
//!
//! Observers that want a push feed, rather than polling
//! [`latest_reading`](crate::coordinator::CoordinatorHandle::latest_reading),
//! subscribe to a broadcast channel of [`DeviceEvent`]s. Sending never
//! blocks the protocol loop; slow or absent receivers only lose events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use pulsox_types::Reading;

/// Device identifier for events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Peripheral address or platform identifier.
    pub address: String,
    /// Device model if known.
    pub model: Option<String>,
}

impl DeviceId {
    /// Create a new device ID.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            model: None,
        }
    }

    /// Create a device ID with a model name.
    pub fn with_model(address: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            model: Some(model.into()),
        }
    }
}

/// Events emitted by a device session.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeviceEvent {
    /// Connected and subscribed to the measurement stream.
    Connected {
        /// The device that connected.
        device: DeviceId,
    },
    /// The link went down.
    Disconnected {
        /// The device that disconnected.
        device: DeviceId,
        /// Why the link went down.
        reason: DisconnectReason,
    },
    /// A new reading was decoded.
    Reading {
        /// The device that produced the reading.
        device: DeviceId,
        /// The decoded reading.
        reading: Reading,
    },
    /// A reconnect attempt was scheduled after a failure.
    ReconnectScheduled {
        /// The device awaiting reconnection.
        device: DeviceId,
        /// Failed attempts since the last successful connect.
        attempt: u32,
        /// Backoff delay before the attempt, in milliseconds.
        delay_ms: u64,
    },
    /// The published reading degraded to unavailable.
    BecameUnavailable {
        /// The device whose reading went stale.
        device: DeviceId,
    },
}

/// Reason for a disconnection.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Explicit shutdown requested by the caller.
    UserRequested,
    /// The peripheral dropped the link or went out of range.
    LinkLost,
    /// BLE error occurred.
    BleError(String),
    /// Unknown reason.
    Unknown,
}

/// Sender for device events.
pub type EventSender = broadcast::Sender<DeviceEvent>;

/// Receiver for device events.
pub type EventReceiver = broadcast::Receiver<DeviceEvent>;

/// Event dispatcher fanning events out to any number of receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: DeviceEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_and_receive() {
        let dispatcher = EventDispatcher::new(8);
        let mut receiver = dispatcher.subscribe();

        dispatcher.send(DeviceEvent::Connected {
            device: DeviceId::with_model("AA:BB:CC:DD:EE:FF", "JKS50F"),
        });

        match receiver.recv().await.unwrap() {
            DeviceEvent::Connected { device } => {
                assert_eq!(device.address, "AA:BB:CC:DD:EE:FF");
                assert_eq!(device.model.as_deref(), Some("JKS50F"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_send_without_receivers_does_not_panic() {
        let dispatcher = EventDispatcher::default();
        dispatcher.send(DeviceEvent::BecameUnavailable {
            device: DeviceId::new("AA:BB:CC:DD:EE:FF"),
        });
        assert_eq!(dispatcher.receiver_count(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let event = DeviceEvent::ReconnectScheduled {
            device: DeviceId::new("AA:BB:CC:DD:EE:FF"),
            attempt: 2,
            delay_ms: 4000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"reconnect_scheduled\""));
        assert!(json.contains("\"delay_ms\":4000"));
    }
}
