//! Timeout records and arming options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of one armed timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutRecord {
    /// Unique timeout id.
    pub id: String,
    /// Requested delay in milliseconds.
    pub delay_ms: u64,
    /// When the timeout was armed.
    pub start_time: DateTime<Utc>,
    /// `start_time + delay`.
    pub expiry_time: DateTime<Utc>,
    /// Non-owning link used by `clear_hierarchy`.
    pub parent_id: Option<String>,
    /// Advisory ordering for introspection only.
    pub priority: i32,
    /// Forwarded to the notifier when the timeout fires.
    pub description: Option<String>,
}

/// Optional settings for [`crate::TimeoutCoordinator::start_timeout`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use]
pub struct TimeoutOptions {
    /// Parent timeout id for cascade cancellation.
    pub parent_id: Option<String>,
    /// Advisory priority.
    pub priority: i32,
    /// Human description surfaced on expiry.
    pub description: Option<String>,
}

impl TimeoutOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Link this timeout under `parent_id`.
    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the advisory priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the description forwarded on expiry.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
