//! Lifecycle event bus for the relay work-coordination layer.
//!
//! Task and timeout registries publish state transitions here so dashboard
//! features can subscribe instead of polling snapshots.
//!
//! # Architecture
//!
//! ```text
//! RelayEvent (source, topic, payload)
//!      ↓
//! EventBus.publish() → broadcast::Sender
//!      ↓
//! Fan-out to every live subscriber
//! ```
//!
//! Publishing never blocks and never fails: with no subscribers the event is
//! dropped, and lagging subscribers lose the oldest events first.

mod notify;
mod support;
pub mod topics;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

pub use notify::{BusNotifier, Notifier, TimeoutNotice};
pub use support::{epoch_millis, panic_message};

/// Default bus capacity used when callers have no preference.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// One lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEvent {
    /// Unique event identifier
    pub id: String,
    /// Emitting component (see [`sources`])
    pub source: String,
    /// Event topic (see [`topics`])
    pub topic: String,
    /// Flexible JSON payload
    pub payload: Value,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
}

impl RelayEvent {
    /// Create a new event
    pub fn new(source: impl Into<String>, topic: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            topic: topic.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Subject id carried in the payload, if any.
    #[must_use]
    pub fn subject_id(&self) -> Option<&str> {
        self.payload.get("id").and_then(Value::as_str)
    }
}

impl std::fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} -> {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.source,
            self.topic,
            self.payload
        )
    }
}

/// Async fan-out bus backed by `tokio::sync::broadcast`.
///
/// Cloning is cheap; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus with specified capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Get the bus capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers who received the event, 0 when
    /// nobody is listening.
    pub fn publish(&self, event: RelayEvent) -> usize {
        tracing::trace!(topic = %event.topic, source = %event.source, "relay event");
        self.tx.send(event).unwrap_or(0)
    }

    /// Publish with topic and payload convenience
    pub fn emit(&self, source: &str, topic: &str, payload: Value) -> usize {
        self.publish(RelayEvent::new(source, topic, payload))
    }

    /// Subscribe to all future events. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    /// Get current subscriber count
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// Event source constants
pub mod sources {
    /// Background task scheduler
    pub const TASK_SCHEDULER: &str = "task-scheduler";
    /// Timeout coordinator
    pub const TIMEOUT_COORDINATOR: &str = "timeout-coordinator";
}
