//! Event topic constants for type-safe routing.

/// Task registered and queued
pub const TASK_QUEUED: &str = "task/queued";
/// Task moved to running
pub const TASK_STARTED: &str = "task/started";
/// Task progress or message updated
pub const TASK_PROGRESS: &str = "task/progress";
/// Task settled successfully
pub const TASK_COMPLETED: &str = "task/completed";
/// Task settled with an error, timed out, or was cancelled while running
pub const TASK_FAILED: &str = "task/failed";
/// Task cancelled before it started
pub const TASK_CANCELLED: &str = "task/cancelled";
/// Completed task evicted from retained history
pub const TASK_PRUNED: &str = "task/pruned";

/// Timeout armed
pub const TIMEOUT_STARTED: &str = "timeout/started";
/// Timeout callback ran
pub const TIMEOUT_FIRED: &str = "timeout/fired";
/// Timeout cancelled before firing
pub const TIMEOUT_CLEARED: &str = "timeout/cleared";
/// Notification forwarded for an expired timeout
pub const TIMEOUT_NOTIFY: &str = "timeout/notify";
