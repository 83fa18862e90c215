//! Error types for task submission.
//!
//! Invocation failures never surface here: they are recorded on the task
//! record and observed through snapshots or events.

use thiserror::Error;

/// Submission errors returned by [`crate::TaskScheduler::add_task`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// A task with this id is still queued or running.
    #[error("task {0} is still queued or running; ids may only be reused after settlement")]
    DuplicateTask(String),

    /// The optional pending-queue limit is reached.
    #[error("task queue is full (capacity: {0})")]
    QueueFull(usize),
}

/// Result type for task scheduler operations.
pub type Result<T> = std::result::Result<T, TaskError>;
