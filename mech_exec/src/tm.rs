//! # Telemetry
//!
//! Controllers report state transitions through a [`TelemetrySink`]. Publishing must never block
//! a control loop, so sinks either handle the event immediately or drop it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    mpsc::{sync_channel, Receiver, SyncSender, TrySendError},
    Mutex,
};

use comms_if::eqpt::mech::MechEvent;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lock;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait TelemetrySink: Send + Sync {
    /// Publish a named event with a structured payload. Must not block.
    fn publish(&self, name: &str, payload: Value);

    fn publish_event(&self, event: &MechEvent) {
        self.publish(event.name(), event.payload())
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Sink which writes every event to the log.
#[derive(Debug, Default)]
pub struct LogSink;

/// Sink which fans events out to any number of listeners.
///
/// Each listener has a bounded queue. When a queue is full the message is dropped for that
/// listener, and listeners whose receiver has been dropped are removed.
pub struct EventBus {
    listeners: Mutex<Vec<SyncSender<TmMessage>>>,

    /// Queue length of new listeners
    capacity: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TmMessage {
    pub name: String,
    pub payload: Value,

    /// Seconds since the session epoch
    pub time_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TelemetrySink for LogSink {
    fn publish(&self, name: &str, payload: Value) {
        debug!("TM {}: {}", name, payload);
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Add a listener, returning the receiving end of its queue.
    pub fn subscribe(&self) -> Receiver<TmMessage> {
        let (tx, rx) = sync_channel(self.capacity);
        lock(&self.listeners).push(tx);
        rx
    }

    pub fn num_listeners(&self) -> usize {
        lock(&self.listeners).len()
    }
}

impl TelemetrySink for EventBus {
    fn publish(&self, name: &str, payload: Value) {
        let msg = TmMessage {
            name: name.to_owned(),
            payload,
            time_s: util::session::get_elapsed_seconds(),
        };

        lock(&self.listeners).retain(|tx| match tx.try_send(msg.clone()) {
            Ok(_) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Telemetry listener queue full, dropping {}", msg.name);
                true
            },
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_event_bus() {
        let bus = EventBus::new(2);
        let rx_a = bus.subscribe();
        let rx_b = bus.subscribe();
        assert_eq!(bus.num_listeners(), 2);

        bus.publish_event(&MechEvent::DriveMotion { active: true });

        let msg = rx_a.try_recv().unwrap();
        assert_eq!(msg.name, "drive_motion");
        assert_eq!(msg.payload, serde_json::json!({ "active": true }));
        assert_eq!(rx_b.try_recv().unwrap().name, "drive_motion");

        // A dropped listener is removed on the next publish
        drop(rx_b);
        bus.publish("a", Value::Null);
        assert_eq!(bus.num_listeners(), 1);

        // A full queue drops instead of blocking
        bus.publish("b", Value::Null);
        bus.publish("c", Value::Null);
        let names: Vec<String> = rx_a.try_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(bus.num_listeners(), 1);
    }
}
