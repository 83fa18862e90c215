use std::time::Instant;

use crate::types::{TaskMetricsSnapshot, TaskRecord, TaskStatus};

use super::TaskScheduler;

impl TaskScheduler {
    /// Snapshot of every tracked task in submission order.
    #[must_use]
    pub fn tasks(&self) -> Vec<TaskRecord> {
        let state = self.lock_state();
        let mut tracked: Vec<_> = state.tasks.values().collect();
        tracked.sort_by_key(|task| task.seq);
        tracked.into_iter().map(|task| task.record.clone()).collect()
    }

    /// Query one task.
    #[must_use]
    pub fn task(&self, id: &str) -> Option<TaskRecord> {
        self.lock_state()
            .tasks
            .get(id)
            .map(|task| task.record.clone())
    }

    /// Ids of tasks currently holding a slot, in start order.
    #[must_use]
    pub fn running_ids(&self) -> Vec<String> {
        let state = self.lock_state();
        let mut running: Vec<_> = state
            .tasks
            .values()
            .filter(|task| task.record.status == TaskStatus::Running)
            .collect();
        running.sort_by_key(|task| (task.started_at, task.seq));
        running
            .into_iter()
            .map(|task| task.record.id.clone())
            .collect()
    }

    /// Whether the drain loop still has queued or running work.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.lock_state().is_processing()
    }

    /// Tasks currently in `Running`.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.lock_state().running_count()
    }

    /// Invocations waiting for a slot.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Aggregate counts and ages.
    #[must_use]
    pub fn metrics(&self) -> TaskMetricsSnapshot {
        let now = Instant::now();
        let state = self.lock_state();

        let mut snapshot = TaskMetricsSnapshot {
            total_tasks: state.tasks.len(),
            idle: 0,
            running: 0,
            completed: 0,
            failed: 0,
            oldest_queued_age: None,
            longest_running_age: None,
            processing: state.is_processing(),
        };

        for task in state.tasks.values() {
            match task.record.status {
                TaskStatus::Idle => {
                    snapshot.idle += 1;
                    let age = now.saturating_duration_since(task.submitted_at);
                    snapshot.oldest_queued_age =
                        Some(snapshot.oldest_queued_age.map_or(age, |v| v.max(age)));
                }
                TaskStatus::Running => {
                    snapshot.running += 1;
                    if let Some(started_at) = task.started_at {
                        let age = now.saturating_duration_since(started_at);
                        snapshot.longest_running_age =
                            Some(snapshot.longest_running_age.map_or(age, |v| v.max(age)));
                    }
                }
                TaskStatus::Completed => snapshot.completed += 1,
                TaskStatus::Failed => snapshot.failed += 1,
            }
        }

        snapshot
    }
}
