//! relay-tasks - background task scheduler for the dashboard's long-running work.
//!
//! Features (data sync, AI analysis, auth refresh) submit named invocations;
//! the scheduler:
//! - starts them strictly in arrival order,
//! - keeps at most `max_concurrent` running,
//! - records every outcome on a [`TaskRecord`] instead of returning it,
//! - keeps a bounded window of completed records.
//!
//! Failed and panicking invocations are isolated per task and never stop the
//! queue from draining.

mod error;
mod scheduler;
mod types;

pub use error::{Result, TaskError};
pub use scheduler::{TaskContext, TaskScheduler};
pub use types::{
    CANCELLED_MESSAGE, TaskMetricsSnapshot, TaskRecord, TaskSchedulerConfig, TaskStatus,
};
