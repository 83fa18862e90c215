//! Shared types for the task scheduler.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::scheduler::TaskContext;

/// Message recorded on a running task cancelled through `cancel_task`.
pub const CANCELLED_MESSAGE: &str = "cancelled by user";

/// Task lifecycle state. Moves only `Idle → Running → {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted and waiting in the FIFO queue.
    Idle,
    /// Occupying one concurrency slot.
    Running,
    /// Invocation resolved successfully.
    Completed,
    /// Invocation failed, panicked, timed out, or was cancelled while running.
    Failed,
}

impl TaskStatus {
    /// Whether the task has left `Running` for good.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Lowercase label used in logs and event payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one tracked task.
///
/// Records disappear from snapshots in these cases only:
/// - a completed record is pruned once it falls outside the `keep_completed`
///   window, or dropped by `clear_completed_tasks`;
/// - a task cancelled while still queued is removed at once, since it never
///   ran and has no terminal status (a `task/cancelled` event is published);
/// - a settled record is replaced when its id is submitted again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task id.
    pub id: String,
    /// Human label, not unique.
    pub name: String,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Optional 0–100 progress.
    pub progress: Option<u8>,
    /// Optional human-readable status line.
    pub message: Option<String>,
    /// Set when the task enters `Running`.
    pub start_time: Option<DateTime<Utc>>,
    /// Set when the task leaves `Running`.
    pub end_time: Option<DateTime<Utc>>,
    /// Captured failure, only present when `status == Failed`.
    pub error: Option<String>,
}

/// Config for the scheduler queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSchedulerConfig {
    /// Maximum simultaneously running tasks.
    pub max_concurrent: usize,
    /// Completed records retained before the oldest are pruned.
    pub keep_completed: usize,
    /// Optional pending-queue limit; `None` queues without bound.
    pub queue_capacity: Option<usize>,
    /// Optional per-task execution limit.
    pub task_timeout: Option<Duration>,
}

impl Default for TaskSchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            keep_completed: 10,
            queue_capacity: None,
            task_timeout: None,
        }
    }
}

/// Aggregate queue/slot metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMetricsSnapshot {
    /// Total tasks currently tracked.
    pub total_tasks: usize,
    /// Count by state.
    pub idle: usize,
    /// Count by state.
    pub running: usize,
    /// Count by state.
    pub completed: usize,
    /// Count by state.
    pub failed: usize,
    /// Age of the oldest queued task.
    pub oldest_queued_age: Option<Duration>,
    /// Age of the longest-running task.
    pub longest_running_age: Option<Duration>,
    /// Whether the drain loop has queued or running work.
    pub processing: bool,
}

pub(crate) type Invocation =
    Box<dyn FnOnce(TaskContext) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

pub(crate) struct QueuedInvocation {
    pub(crate) id: String,
    pub(crate) seq: u64,
    pub(crate) invocation: Invocation,
}

/// Internal record plus the bookkeeping that never leaves the scheduler.
#[derive(Debug, Clone)]
pub(crate) struct TrackedTask {
    pub(crate) record: TaskRecord,
    /// Distinguishes successive tasks that reuse one id.
    pub(crate) seq: u64,
    pub(crate) submitted_at: Instant,
    pub(crate) started_at: Option<Instant>,
}

impl TrackedTask {
    pub(crate) fn new(id: String, name: String, seq: u64) -> Self {
        Self {
            record: TaskRecord {
                id,
                name,
                status: TaskStatus::Idle,
                progress: None,
                message: None,
                start_time: None,
                end_time: None,
                error: None,
            },
            seq,
            submitted_at: Instant::now(),
            started_at: None,
        }
    }

    pub(crate) fn mark_running(&mut self) {
        self.record.status = TaskStatus::Running;
        self.record.start_time = Some(Utc::now());
        self.started_at = Some(Instant::now());
    }

    pub(crate) fn mark_completed(&mut self) {
        self.record.status = TaskStatus::Completed;
        self.record.end_time = Some(Utc::now());
        if self.record.progress.is_none() {
            self.record.progress = Some(100);
        }
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        self.record.status = TaskStatus::Failed;
        self.record.end_time = Some(Utc::now());
        self.record.error = Some(error);
    }
}

/// How a spawned invocation ended.
#[derive(Debug)]
pub(crate) enum Settlement {
    Succeeded,
    Failed(String),
    Panicked(String),
    TimedOut(Duration),
}
