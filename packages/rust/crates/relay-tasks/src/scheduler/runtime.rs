use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use relay_events::{panic_message, topics};
use serde_json::json;

use crate::types::{QueuedInvocation, Settlement, TaskStatus};

use super::{SchedulerState, TaskContext, TaskScheduler};

pub(super) struct StartedTask {
    queued: QueuedInvocation,
    name: String,
}

impl TaskScheduler {
    /// Start queued invocations until the queue is empty or every slot is
    /// taken. Runs inside the caller's critical section so a settlement and
    /// the start of its successor are one transition.
    pub(super) fn start_ready(&self, state: &mut SchedulerState) -> Vec<StartedTask> {
        let mut started = Vec::new();
        while state.running_count() < self.shared.config.max_concurrent {
            let Some(next) = state.pending.pop_front() else {
                break;
            };
            let Some(task) = state.tasks.get_mut(&next.id) else {
                continue;
            };
            if task.seq != next.seq || task.record.status != TaskStatus::Idle {
                continue;
            }
            task.mark_running();
            let name = task.record.name.clone();
            started.push(StartedTask { queued: next, name });
        }
        started
    }

    /// Publish and spawn tasks already marked running by [`Self::start_ready`].
    pub(super) fn launch(&self, started: Vec<StartedTask>) {
        for StartedTask { queued, name } in started {
            tracing::debug!(task_id = %queued.id, task_name = %name, "task started");
            self.publish(
                topics::TASK_STARTED,
                json!({ "id": queued.id, "name": name }),
            );
            self.spawn_invocation(queued);
        }
    }

    fn spawn_invocation(&self, queued: QueuedInvocation) {
        let scheduler = self.clone();
        let task_timeout = self.shared.config.task_timeout;
        tokio::spawn(async move {
            let QueuedInvocation {
                id,
                seq,
                invocation,
            } = queued;
            let ctx = TaskContext {
                id: id.clone(),
                seq,
                scheduler: scheduler.clone(),
            };
            // The closure itself runs inside the guard so a panic while
            // building the future is captured like one raised while polling it.
            let guarded = AssertUnwindSafe(async move { invocation(ctx).await }).catch_unwind();

            let settlement = match task_timeout {
                Some(limit) => match tokio::time::timeout(limit, guarded).await {
                    Ok(outcome) => settle_outcome(outcome),
                    Err(_) => Settlement::TimedOut(limit),
                },
                None => settle_outcome(guarded.await),
            };
            scheduler.settle(&id, seq, settlement);
        });
    }

    /// Record the outcome of one invocation exactly once, then keep draining.
    fn settle(&self, id: &str, seq: u64, settlement: Settlement) {
        let keep_completed = self.shared.config.keep_completed;
        let settled = {
            let mut state = self.lock_state();
            let current = state
                .tasks
                .get_mut(id)
                .filter(|task| task.seq == seq && task.record.status == TaskStatus::Running);
            let outcome = match current {
                None => None,
                Some(task) => match settlement {
                    Settlement::Succeeded => {
                        task.mark_completed();
                        state.completed_order.push_back((id.to_string(), seq));
                        Some((None, state.prune_completed(keep_completed)))
                    }
                    Settlement::Failed(error) | Settlement::Panicked(error) => {
                        task.mark_failed(error.clone());
                        Some((Some(error), Vec::new()))
                    }
                    Settlement::TimedOut(limit) => {
                        let error = format!("timed out after {}ms", limit.as_millis());
                        task.mark_failed(error.clone());
                        Some((Some(error), Vec::new()))
                    }
                },
            };
            (outcome, self.start_ready(&mut state))
        };

        let (outcome, started) = settled;
        let Some((error, pruned)) = outcome else {
            // Cancelled while running, or the id was reused since.
            tracing::debug!(task_id = %id, "abandoned invocation settled; result discarded");
            self.launch(started);
            return;
        };

        match &error {
            None => {
                tracing::debug!(task_id = %id, "task completed");
                self.publish(topics::TASK_COMPLETED, json!({ "id": id }));
            }
            Some(error) => {
                tracing::warn!(task_id = %id, %error, "task failed");
                self.publish(topics::TASK_FAILED, json!({ "id": id, "error": error }));
            }
        }
        for pruned_id in pruned {
            tracing::trace!(task_id = %pruned_id, "completed task pruned from history");
            self.publish(topics::TASK_PRUNED, json!({ "id": pruned_id }));
        }

        self.launch(started);
        self.notify_if_idle();
    }
}

fn settle_outcome(
    outcome: Result<anyhow::Result<()>, Box<dyn std::any::Any + Send>>,
) -> Settlement {
    match outcome {
        Ok(Ok(())) => Settlement::Succeeded,
        Ok(Err(error)) => Settlement::Failed(format!("{error:#}")),
        Err(payload) => {
            Settlement::Panicked(format!("panicked: {}", panic_message(payload.as_ref())))
        }
    }
}
