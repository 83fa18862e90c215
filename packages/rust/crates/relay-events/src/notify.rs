//! Notification seam for user-facing timeout notices.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{EventBus, sources, topics};

/// Notice handed to the notification surface when a described timeout expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutNotice {
    /// Id of the timeout that expired.
    pub timeout_id: String,
    /// Human description supplied when the timeout was armed.
    pub description: String,
}

/// User-facing notification collaborator.
///
/// Calls are fire-and-forget: implementations must return promptly and never
/// block expiry bookkeeping.
pub trait Notifier: Send + Sync {
    /// Deliver one notice.
    fn notify(&self, notice: TimeoutNotice);
}

/// [`Notifier`] that republishes notices on an [`EventBus`] under
/// [`topics::TIMEOUT_NOTIFY`].
#[derive(Clone)]
pub struct BusNotifier {
    bus: EventBus,
}

impl BusNotifier {
    /// Wrap a bus.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl Notifier for BusNotifier {
    fn notify(&self, notice: TimeoutNotice) {
        self.bus.emit(
            sources::TIMEOUT_COORDINATOR,
            topics::TIMEOUT_NOTIFY,
            json!({ "id": notice.timeout_id, "description": notice.description }),
        );
    }
}
