#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use relay_events::{EventBus, topics};
use relay_tasks::{
    CANCELLED_MESSAGE, TaskError, TaskScheduler, TaskSchedulerConfig, TaskStatus,
};
use tokio::sync::oneshot;

fn config(max_concurrent: usize, keep_completed: usize) -> TaskSchedulerConfig {
    TaskSchedulerConfig {
        max_concurrent,
        keep_completed,
        queue_capacity: None,
        task_timeout: None,
    }
}

/// Manually released invocations: each task blocks until its gate is sent.
#[derive(Default)]
struct Gates {
    senders: HashMap<String, oneshot::Sender<Result<(), String>>>,
}

impl Gates {
    fn submit(&mut self, scheduler: &TaskScheduler, id: &str) {
        let (tx, rx) = oneshot::channel::<Result<(), String>>();
        self.senders.insert(id.to_string(), tx);
        scheduler
            .add_task(id, format!("gated {id}"), move |_ctx| async move {
                match rx.await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(error)) => Err(anyhow!(error)),
                    Err(_) => Err(anyhow!("gate dropped")),
                }
            })
            .expect("submit should succeed");
    }

    fn release(&mut self, id: &str) {
        let tx = self.senders.remove(id).expect("gate should exist");
        let _ = tx.send(Ok(()));
    }

    fn fail(&mut self, id: &str, error: &str) {
        let tx = self.senders.remove(id).expect("gate should exist");
        let _ = tx.send(Err(error.to_string()));
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition should hold within 2s");
}

fn status(scheduler: &TaskScheduler, id: &str) -> Option<TaskStatus> {
    scheduler.task(id).map(|task| task.status)
}

#[tokio::test]
async fn end_to_end_running_set_slides_in_submission_order() {
    let scheduler = TaskScheduler::new(config(2, 10));
    let mut gates = Gates::default();
    for id in ["t1", "t2", "t3", "t4"] {
        gates.submit(&scheduler, id);
    }

    assert_eq!(scheduler.running_ids(), vec!["t1", "t2"]);
    assert_eq!(scheduler.queued_count(), 2);
    assert_eq!(status(&scheduler, "t3"), Some(TaskStatus::Idle));

    gates.release("t1");
    wait_for(|| status(&scheduler, "t1") == Some(TaskStatus::Completed)).await;
    assert_eq!(scheduler.running_ids(), vec!["t2", "t3"]);

    gates.release("t2");
    wait_for(|| status(&scheduler, "t2") == Some(TaskStatus::Completed)).await;
    assert_eq!(scheduler.running_ids(), vec!["t3", "t4"]);

    gates.release("t3");
    gates.release("t4");
    tokio::time::timeout(Duration::from_secs(2), scheduler.wait_until_idle())
        .await
        .expect("queue should drain");
    assert!(scheduler.running_ids().is_empty());
    assert!(!scheduler.is_processing());
    assert_eq!(scheduler.metrics().completed, 4);
}

#[tokio::test]
async fn fifo_with_single_slot() {
    let scheduler = TaskScheduler::new(config(1, 10));
    let mut gates = Gates::default();
    for id in ["a", "b", "c"] {
        gates.submit(&scheduler, id);
    }

    assert_eq!(status(&scheduler, "a"), Some(TaskStatus::Running));
    assert_eq!(status(&scheduler, "b"), Some(TaskStatus::Idle));
    assert_eq!(status(&scheduler, "c"), Some(TaskStatus::Idle));

    gates.release("a");
    wait_for(|| status(&scheduler, "b") == Some(TaskStatus::Running)).await;
    assert_eq!(status(&scheduler, "a"), Some(TaskStatus::Completed));
    assert_eq!(status(&scheduler, "c"), Some(TaskStatus::Idle));

    gates.release("b");
    wait_for(|| status(&scheduler, "c") == Some(TaskStatus::Running)).await;
    assert_eq!(status(&scheduler, "b"), Some(TaskStatus::Completed));

    let start_a = scheduler.task("a").and_then(|t| t.start_time).expect("a started");
    let end_a = scheduler.task("a").and_then(|t| t.end_time).expect("a ended");
    let start_b = scheduler.task("b").and_then(|t| t.start_time).expect("b started");
    assert!(start_a <= end_a);
    assert!(end_a <= start_b);
    gates.release("c");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn running_count_never_exceeds_ceiling() {
    let scheduler = TaskScheduler::new(config(3, 100));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for index in 0..24 {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        scheduler
            .add_task(format!("load-{index}"), "load", move |_ctx| async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5 + (index % 4) * 3)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("submit should succeed");
        assert!(scheduler.running_count() <= 3);
    }

    let watcher = scheduler.clone();
    let observe = tokio::spawn(async move {
        while watcher.is_processing() {
            assert!(watcher.running_count() <= 3);
            tokio::task::yield_now().await;
        }
    });

    tokio::time::timeout(Duration::from_secs(5), scheduler.wait_until_idle())
        .await
        .expect("queue should drain");
    observe.await.expect("observer should not panic");
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(scheduler.metrics().completed, 24);
}

#[tokio::test]
async fn history_keeps_only_most_recent_completions() {
    let scheduler = TaskScheduler::new(config(1, 2));
    let mut gates = Gates::default();
    for id in ["a", "b", "c"] {
        gates.submit(&scheduler, id);
    }
    for id in ["a", "b", "c"] {
        gates.release(id);
        wait_for(|| status(&scheduler, id) == Some(TaskStatus::Completed)).await;
    }

    let completed: Vec<String> = scheduler
        .tasks()
        .into_iter()
        .filter(|task| task.status == TaskStatus::Completed)
        .map(|task| task.id)
        .collect();
    assert_eq!(completed, vec!["b", "c"]);
    assert!(scheduler.task("a").is_none());
}

#[tokio::test]
async fn failed_tasks_are_exempt_from_pruning() {
    let scheduler = TaskScheduler::new(config(1, 1));
    let mut gates = Gates::default();
    for id in ["bad", "ok1", "ok2"] {
        gates.submit(&scheduler, id);
    }
    gates.fail("bad", "sync endpoint unavailable");
    gates.release("ok1");
    gates.release("ok2");
    scheduler.wait_until_idle().await;

    let failed = scheduler.task("bad").expect("failed task retained");
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(
        failed
            .error
            .as_deref()
            .is_some_and(|error| error.contains("sync endpoint unavailable"))
    );
    assert!(scheduler.task("ok1").is_none());
    assert_eq!(status(&scheduler, "ok2"), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn cancelled_queued_task_is_never_invoked() {
    let scheduler = TaskScheduler::new(config(1, 10));
    let mut gates = Gates::default();
    gates.submit(&scheduler, "blocker");

    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invoked);
    scheduler
        .add_task("victim", "victim", move |_ctx| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .expect("submit should succeed");
    assert_eq!(status(&scheduler, "victim"), Some(TaskStatus::Idle));

    assert!(scheduler.cancel_task("victim"));
    assert!(scheduler.task("victim").is_none());
    assert_eq!(scheduler.queued_count(), 0);

    gates.release("blocker");
    scheduler.wait_until_idle().await;
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelling_running_task_marks_failed_and_frees_slot() {
    let scheduler = TaskScheduler::new(config(1, 10));
    let mut gates = Gates::default();
    gates.submit(&scheduler, "slow");
    gates.submit(&scheduler, "next");

    assert!(scheduler.cancel_task("slow"));
    let cancelled = scheduler.task("slow").expect("record kept");
    assert_eq!(cancelled.status, TaskStatus::Failed);
    assert_eq!(cancelled.message.as_deref(), Some(CANCELLED_MESSAGE));
    assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_MESSAGE));
    assert!(cancelled.end_time.is_some());
    assert_eq!(status(&scheduler, "next"), Some(TaskStatus::Running));

    // The abandoned invocation still settles; its success must not revive it.
    gates.release("slow");
    gates.release("next");
    scheduler.wait_until_idle().await;
    tokio::task::yield_now().await;
    assert_eq!(status(&scheduler, "slow"), Some(TaskStatus::Failed));
    assert_eq!(status(&scheduler, "next"), Some(TaskStatus::Completed));

    // A second cancel on a settled task is a no-op.
    assert!(!scheduler.cancel_task("slow"));
}

#[tokio::test]
async fn unknown_id_operations_leave_records_untouched() {
    let scheduler = TaskScheduler::new(config(1, 10));
    let mut gates = Gates::default();
    gates.submit(&scheduler, "real");
    let before = scheduler.tasks();

    assert!(!scheduler.cancel_task("nonexistent"));
    scheduler.update_task_progress("nonexistent", 10, Some("nothing"));

    assert_eq!(scheduler.tasks(), before);
    gates.release("real");
}

#[tokio::test]
async fn progress_updates_are_permitted_after_settlement() {
    let scheduler = TaskScheduler::new(config(1, 10));
    scheduler
        .add_task("report", "quarterly report", |ctx| async move {
            ctx.report_progress(40, Some("fetching clients"));
            Ok(())
        })
        .expect("submit should succeed");
    scheduler.wait_until_idle().await;

    let done = scheduler.task("report").expect("task tracked");
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, Some(40));
    assert_eq!(done.message.as_deref(), Some("fetching clients"));

    scheduler.update_task_progress("report", 250, Some("late update"));
    let updated = scheduler.task("report").expect("task tracked");
    assert_eq!(updated.status, TaskStatus::Completed);
    assert_eq!(updated.progress, Some(100));
    assert_eq!(updated.message.as_deref(), Some("late update"));
}

#[tokio::test]
async fn success_without_progress_reports_full_progress() {
    let scheduler = TaskScheduler::new(config(2, 10));
    scheduler
        .add_task("quiet", "quiet", |_ctx| async { Ok(()) })
        .expect("submit should succeed");
    scheduler.wait_until_idle().await;
    assert_eq!(scheduler.task("quiet").and_then(|t| t.progress), Some(100));
}

#[tokio::test]
async fn failures_and_panics_do_not_stop_draining() {
    let scheduler = TaskScheduler::new(config(1, 10));
    scheduler
        .add_task("err", "errors", |_ctx| async { Err(anyhow!("analysis rejected")) })
        .expect("submit should succeed");
    scheduler
        .add_task("panic", "panics", |_ctx| async {
            let explode = true;
            if explode {
                panic!("invocation exploded");
            }
            Ok(())
        })
        .expect("submit should succeed");
    scheduler
        .add_task("after", "after", |_ctx| async { Ok(()) })
        .expect("submit should succeed");

    tokio::time::timeout(Duration::from_secs(2), scheduler.wait_until_idle())
        .await
        .expect("queue should drain");

    let err = scheduler.task("err").expect("tracked");
    assert_eq!(err.status, TaskStatus::Failed);
    assert_eq!(err.error.as_deref(), Some("analysis rejected"));
    assert_eq!(err.progress, None);

    let panicked = scheduler.task("panic").expect("tracked");
    assert_eq!(panicked.status, TaskStatus::Failed);
    assert!(
        panicked
            .error
            .as_deref()
            .is_some_and(|error| error.contains("invocation exploded"))
    );

    assert_eq!(status(&scheduler, "after"), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn task_timeout_marks_failed() {
    let scheduler = TaskScheduler::new(TaskSchedulerConfig {
        task_timeout: Some(Duration::from_millis(20)),
        ..config(1, 10)
    });
    scheduler
        .add_task("stuck", "stuck", |_ctx| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .expect("submit should succeed");

    tokio::time::timeout(Duration::from_secs(2), scheduler.wait_until_idle())
        .await
        .expect("timeout should settle the task");
    let stuck = scheduler.task("stuck").expect("tracked");
    assert_eq!(stuck.status, TaskStatus::Failed);
    assert_eq!(stuck.error.as_deref(), Some("timed out after 20ms"));
}

#[tokio::test]
async fn live_ids_are_rejected_and_settled_ids_reusable() {
    let scheduler = TaskScheduler::new(config(1, 10));
    let mut gates = Gates::default();
    gates.submit(&scheduler, "sync");

    let duplicate = scheduler.add_task("sync", "again", |_ctx| async { Ok(()) });
    assert_eq!(duplicate, Err(TaskError::DuplicateTask("sync".to_string())));

    gates.release("sync");
    scheduler.wait_until_idle().await;

    let reused = scheduler
        .add_task("sync", "again", |_ctx| async { Ok(()) })
        .expect("settled id should be reusable");
    assert_eq!(reused, "sync");
    scheduler.wait_until_idle().await;
    assert_eq!(scheduler.task("sync").map(|t| t.name), Some("again".to_string()));
    assert_eq!(scheduler.tasks().len(), 1);
}

#[tokio::test]
async fn queue_capacity_rejects_when_full() {
    let scheduler = TaskScheduler::new(TaskSchedulerConfig {
        queue_capacity: Some(1),
        ..config(1, 10)
    });
    let mut gates = Gates::default();
    gates.submit(&scheduler, "running");
    gates.submit(&scheduler, "waiting");

    let rejected = scheduler.add_task("overflow", "overflow", |_ctx| async { Ok(()) });
    assert_eq!(rejected, Err(TaskError::QueueFull(1)));
    assert!(scheduler.task("overflow").is_none());

    gates.release("running");
    gates.release("waiting");
    scheduler.wait_until_idle().await;
}

#[tokio::test]
async fn clear_completed_keeps_failed_and_in_flight() {
    let scheduler = TaskScheduler::new(config(2, 10));
    let mut gates = Gates::default();
    for id in ["done", "broken", "busy"] {
        gates.submit(&scheduler, id);
    }
    gates.release("done");
    gates.fail("broken", "bad payload");
    wait_for(|| status(&scheduler, "busy") == Some(TaskStatus::Running)).await;
    wait_for(|| status(&scheduler, "broken") == Some(TaskStatus::Failed)).await;

    assert_eq!(scheduler.clear_completed_tasks(), 1);
    assert!(scheduler.task("done").is_none());
    assert_eq!(status(&scheduler, "broken"), Some(TaskStatus::Failed));
    assert_eq!(status(&scheduler, "busy"), Some(TaskStatus::Running));
    gates.release("busy");
}

#[tokio::test]
async fn anonymous_tasks_get_generated_ids() {
    let scheduler = TaskScheduler::new(config(2, 10));
    let first = scheduler
        .add_anonymous_task("refresh", |_ctx| async { Ok(()) })
        .expect("submit should succeed");
    let second = scheduler
        .add_anonymous_task("refresh", |_ctx| async { Ok(()) })
        .expect("submit should succeed");
    assert!(first.starts_with("task-"));
    assert_ne!(first, second);
    scheduler.wait_until_idle().await;
}

#[tokio::test]
async fn lifecycle_events_are_published_in_order() {
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let scheduler = TaskScheduler::with_events(config(1, 10), bus);

    scheduler
        .add_task("sync", "dashboard sync", |ctx| async move {
            ctx.report_progress(50, None);
            Ok(())
        })
        .expect("submit should succeed");
    scheduler.wait_until_idle().await;

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.subject_id(), Some("sync"));
        seen.push(event.topic);
    }
    assert_eq!(
        seen,
        vec![
            topics::TASK_QUEUED,
            topics::TASK_STARTED,
            topics::TASK_PROGRESS,
            topics::TASK_COMPLETED,
        ]
    );
}

#[tokio::test]
async fn context_observes_cancellation() {
    let scheduler = TaskScheduler::new(config(1, 10));
    let (seen_tx, seen_rx) = oneshot::channel::<bool>();
    let (go_tx, go_rx) = oneshot::channel::<()>();
    scheduler
        .add_task("poller", "poller", move |ctx| async move {
            let _ = go_rx.await;
            let _ = seen_tx.send(ctx.is_cancelled());
            Ok(())
        })
        .expect("submit should succeed");

    assert!(scheduler.cancel_task("poller"));
    let _ = go_tx.send(());
    let observed = tokio::time::timeout(Duration::from_secs(2), seen_rx)
        .await
        .expect("invocation should report")
        .expect("sender kept");
    assert!(observed);
}

#[tokio::test]
async fn cancelled_queued_task_leaves_snapshots_with_an_event() {
    let bus = EventBus::new(32);
    let mut rx = bus.subscribe();
    let scheduler = TaskScheduler::with_events(config(1, 10), bus);
    let mut gates = Gates::default();
    gates.submit(&scheduler, "blocker");
    gates.submit(&scheduler, "queued");

    assert!(scheduler.cancel_task("queued"));
    let ids: Vec<String> = scheduler.tasks().into_iter().map(|task| task.id).collect();
    assert_eq!(ids, vec!["blocker"]);

    let mut cancelled = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.topic == topics::TASK_CANCELLED {
            cancelled.push(event.subject_id().map(str::to_string));
        }
    }
    assert_eq!(cancelled, vec![Some("queued".to_string())]);

    gates.release("blocker");
    scheduler.wait_until_idle().await;
}
