//! Core registry for the background task queue.

mod metrics;
mod runtime;

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use relay_events::{EventBus, epoch_millis, sources, topics};
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::error::{Result, TaskError};
use crate::types::{
    CANCELLED_MESSAGE, QueuedInvocation, TaskSchedulerConfig, TaskStatus, TrackedTask,
};

/// Runs submitted invocations FIFO with at most `max_concurrent` in flight.
///
/// The handle is cheap to clone; every clone drives the same registry. All
/// mutations finish before the calling method returns, so concurrent callers
/// only ever see whole snapshots. Methods that can start work spawn onto the
/// ambient Tokio runtime and must be called from inside one.
#[derive(Clone)]
pub struct TaskScheduler {
    shared: Arc<Shared>,
}

struct Shared {
    config: TaskSchedulerConfig,
    state: Mutex<SchedulerState>,
    events: Option<EventBus>,
    next_seq: AtomicU64,
    idle: Notify,
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<String, TrackedTask>,
    pending: VecDeque<QueuedInvocation>,
    /// `(id, seq)` of completed tasks, oldest completion first.
    completed_order: VecDeque<(String, u64)>,
}

impl SchedulerState {
    fn running_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|task| task.record.status == TaskStatus::Running)
            .count()
    }

    fn is_processing(&self) -> bool {
        !self.pending.is_empty() || self.running_count() > 0
    }

    fn prune_completed(&mut self, keep: usize) -> Vec<String> {
        let mut pruned = Vec::new();
        while self.completed_order.len() > keep {
            let Some((id, seq)) = self.completed_order.pop_front() else {
                break;
            };
            let evictable = self
                .tasks
                .get(&id)
                .is_some_and(|task| task.seq == seq && task.record.status == TaskStatus::Completed);
            if evictable {
                self.tasks.remove(&id);
                pruned.push(id);
            }
        }
        pruned
    }
}

/// Handle passed to every invocation so it can report progress about itself.
#[derive(Clone)]
pub struct TaskContext {
    id: String,
    seq: u64,
    scheduler: TaskScheduler,
}

impl TaskContext {
    /// Id of the task running this invocation.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Report intermediate progress for this task.
    ///
    /// Ignored once the id has been reused by a newer task.
    pub fn report_progress(&self, progress: u8, message: Option<&str>) {
        self.scheduler
            .apply_progress(&self.id, Some(self.seq), progress, message);
    }

    /// Whether the scheduler has abandoned this invocation.
    ///
    /// Cancellation never interrupts a running invocation; long-running work
    /// can poll this to stop early.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        let state = self.scheduler.lock_state();
        state
            .tasks
            .get(&self.id)
            .is_none_or(|task| task.seq != self.seq || task.record.status != TaskStatus::Running)
    }
}

impl TaskScheduler {
    /// Create a scheduler without event publishing.
    #[must_use]
    pub fn new(config: TaskSchedulerConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a scheduler that publishes lifecycle events on `events`.
    #[must_use]
    pub fn with_events(config: TaskSchedulerConfig, events: EventBus) -> Self {
        Self::build(config, Some(events))
    }

    fn build(mut config: TaskSchedulerConfig, events: Option<EventBus>) -> Self {
        config.max_concurrent = config.max_concurrent.max(1);
        config.queue_capacity = config.queue_capacity.map(|capacity| capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(SchedulerState::default()),
                events,
                next_seq: AtomicU64::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Effective configuration after clamping.
    #[must_use]
    pub fn config(&self) -> &TaskSchedulerConfig {
        &self.shared.config
    }

    /// Register a task and queue its invocation. Returns immediately.
    ///
    /// The invocation receives a [`TaskContext`] and runs once a slot frees
    /// up; its outcome is recorded on the task, never returned here.
    ///
    /// # Errors
    ///
    /// - [`TaskError::DuplicateTask`] when `id` is still queued or running.
    /// - [`TaskError::QueueFull`] when `queue_capacity` is set and reached.
    pub fn add_task<F, Fut>(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        invocation: F,
    ) -> Result<String>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = id.into();
        let name = name.into();
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);

        let started = {
            let mut state = self.lock_state();
            if let Some(existing) = state.tasks.get(&id)
                && !existing.record.status.is_settled()
            {
                return Err(TaskError::DuplicateTask(id));
            }
            if let Some(capacity) = self.shared.config.queue_capacity
                && state.pending.len() >= capacity
            {
                tracing::warn!(task_id = %id, capacity, "task queue full; rejecting submission");
                return Err(TaskError::QueueFull(capacity));
            }
            if state.tasks.remove(&id).is_some() {
                state.completed_order.retain(|(done_id, _)| done_id != &id);
            }
            state
                .tasks
                .insert(id.clone(), TrackedTask::new(id.clone(), name.clone(), seq));
            state.pending.push_back(QueuedInvocation {
                id: id.clone(),
                seq,
                invocation: Box::new(
                    move |ctx: TaskContext| -> BoxFuture<'static, anyhow::Result<()>> {
                        invocation(ctx).boxed()
                    },
                ),
            });
            self.start_ready(&mut state)
        };

        tracing::debug!(task_id = %id, task_name = %name, "task queued");
        self.publish(topics::TASK_QUEUED, json!({ "id": id, "name": name }));
        self.launch(started);
        Ok(id)
    }

    /// [`Self::add_task`] with a generated `task-<epoch_ms>-<seq>` id.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_task`]; generated ids never collide, so only
    /// [`TaskError::QueueFull`] is possible in practice.
    pub fn add_anonymous_task<F, Fut>(&self, name: impl Into<String>, invocation: F) -> Result<String>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        self.add_task(format!("task-{}-{seq}", epoch_millis()), name, invocation)
    }

    /// Set progress (clamped to 100) and optionally the message of a task.
    ///
    /// There is no status guard: settled tasks are updated too. Unknown ids
    /// are ignored.
    pub fn update_task_progress(&self, id: &str, progress: u8, message: Option<&str>) {
        self.apply_progress(id, None, progress, message);
    }

    fn apply_progress(&self, id: &str, seq: Option<u64>, progress: u8, message: Option<&str>) {
        let progress = progress.min(100);
        let updated = {
            let mut state = self.lock_state();
            match state.tasks.get_mut(id) {
                Some(task) if seq.is_none_or(|seq| seq == task.seq) => {
                    task.record.progress = Some(progress);
                    if let Some(message) = message {
                        task.record.message = Some(message.to_string());
                    }
                    true
                }
                _ => false,
            }
        };
        if updated {
            tracing::trace!(task_id = %id, progress, "task progress");
            self.publish(
                topics::TASK_PROGRESS,
                json!({ "id": id, "progress": progress, "message": message }),
            );
        }
    }

    /// Cancel a task.
    ///
    /// A queued task is removed from the queue and from tracking without ever
    /// being invoked. A running task is marked failed with
    /// [`CANCELLED_MESSAGE`] and its slot is released; the invocation itself
    /// keeps running and its eventual result is discarded. Unknown or settled
    /// ids are ignored. Returns whether anything was cancelled.
    pub fn cancel_task(&self, id: &str) -> bool {
        let (cancelled, started) = {
            let mut state = self.lock_state();
            if let Some(position) = state.pending.iter().position(|queued| queued.id == id) {
                state.pending.remove(position);
                state.tasks.remove(id);
                (Some(TaskStatus::Idle), Vec::new())
            } else if let Some(task) = state.tasks.get_mut(id)
                && task.record.status == TaskStatus::Running
            {
                task.mark_failed(CANCELLED_MESSAGE.to_string());
                task.record.message = Some(CANCELLED_MESSAGE.to_string());
                (Some(TaskStatus::Running), self.start_ready(&mut state))
            } else {
                (None, Vec::new())
            }
        };

        match cancelled {
            Some(TaskStatus::Idle) => {
                tracing::info!(task_id = %id, "queued task cancelled");
                self.publish(topics::TASK_CANCELLED, json!({ "id": id }));
                self.notify_if_idle();
                true
            }
            Some(_) => {
                tracing::info!(task_id = %id, "running task cancelled; invocation abandoned");
                self.publish(
                    topics::TASK_FAILED,
                    json!({ "id": id, "error": CANCELLED_MESSAGE }),
                );
                self.launch(started);
                self.notify_if_idle();
                true
            }
            None => false,
        }
    }

    /// Drop every completed record. Failed and in-flight tasks are kept.
    /// Returns how many were removed.
    pub fn clear_completed_tasks(&self) -> usize {
        let mut state = self.lock_state();
        let before = state.tasks.len();
        state
            .tasks
            .retain(|_, task| task.record.status != TaskStatus::Completed);
        state.completed_order.clear();
        before - state.tasks.len()
    }

    /// Resolve once nothing is queued or running.
    pub async fn wait_until_idle(&self) {
        loop {
            let mut notified = std::pin::pin!(self.shared.idle.notified());
            notified.as_mut().enable();
            if !self.is_processing() {
                return;
            }
            notified.await;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, topic: &str, payload: Value) {
        if let Some(events) = &self.shared.events {
            events.emit(sources::TASK_SCHEDULER, topic, payload);
        }
    }

    fn notify_if_idle(&self) {
        if !self.is_processing() {
            self.shared.idle.notify_waiters();
        }
    }
}
