//! Scripted workloads driven through a [`WorkCoordinator`], used by the CLI.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, anyhow};
use relay_tasks::{TaskMetricsSnapshot, TaskRecord};
use relay_timeouts::TimeoutOptions;
use serde::Serialize;
use serde_json::{Value, json};

use crate::work::WorkCoordinator;

/// Batch submitted by [`run_simulation`].
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    /// Number of tasks submitted, ids `sim-1..=sim-n`.
    pub tasks: usize,
    /// Wall time each task spends, split across progress steps.
    pub task_duration: Duration,
    /// Progress reports per task (at least 1).
    pub progress_steps: u8,
    /// Every n-th task fails; `0` disables failures.
    pub fail_every: usize,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            tasks: 6,
            task_duration: Duration::from_millis(200),
            progress_steps: 4,
            fail_every: 0,
        }
    }
}

/// Outcome of a simulated batch.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Effective concurrency ceiling.
    pub max_concurrent: usize,
    /// Highest running count observed by any task while it ran.
    pub peak_running: usize,
    /// Final record snapshots in submission order.
    pub tasks: Vec<TaskRecord>,
    /// Scheduler metrics as produced by [`metrics_json`].
    pub metrics: Value,
}

/// Submit `plan.tasks` tasks, wait for the queue to drain, and report.
///
/// # Errors
///
/// Fails when the scheduler rejects a submission (full queue).
pub async fn run_simulation(
    work: &WorkCoordinator,
    plan: &SimulationPlan,
) -> anyhow::Result<SimulationReport> {
    let scheduler = work.scheduler();
    let peak = Arc::new(AtomicUsize::new(0));
    let steps = plan.progress_steps.max(1);
    let step_delay = plan.task_duration / u32::from(steps);

    for index in 1..=plan.tasks {
        let id = format!("sim-{index}");
        let fails = plan.fail_every > 0 && index % plan.fail_every == 0;
        let peak = Arc::clone(&peak);
        let observer = scheduler.clone();
        scheduler
            .add_task(id.clone(), format!("simulated job {index}"), move |ctx| async move {
                peak.fetch_max(observer.running_count(), Ordering::SeqCst);
                for step in 1..=steps {
                    tokio::time::sleep(step_delay).await;
                    if ctx.is_cancelled() {
                        return Ok(());
                    }
                    let progress = u8::try_from(u32::from(step) * 100 / u32::from(steps))
                        .unwrap_or(100);
                    ctx.report_progress(progress, Some(&format!("step {step}/{steps}")));
                }
                if fails {
                    return Err(anyhow!("simulated failure in {}", ctx.id()));
                }
                Ok(())
            })
            .with_context(|| format!("failed to submit {id}"))?;
    }
    tracing::info!(
        tasks = plan.tasks,
        queued = scheduler.queued_count(),
        running = scheduler.running_count(),
        "simulation submitted"
    );

    scheduler.wait_until_idle().await;
    Ok(SimulationReport {
        max_concurrent: scheduler.config().max_concurrent,
        peak_running: peak.load(Ordering::SeqCst),
        tasks: scheduler.tasks(),
        metrics: metrics_json(&scheduler.metrics()),
    })
}

/// Parent timeout with children, cascaded before any of them expires.
#[derive(Debug, Clone)]
pub struct CascadePlan {
    /// Child timeouts armed under `parent`.
    pub children: usize,
    /// Delay shared by parent and children.
    pub delay: Duration,
    /// When to clear the hierarchy; at or past `delay` lets everything fire.
    pub cascade_after: Duration,
}

impl Default for CascadePlan {
    fn default() -> Self {
        Self {
            children: 3,
            delay: Duration::from_millis(500),
            cascade_after: Duration::from_millis(100),
        }
    }
}

/// Outcome of [`run_timeout_cascade`].
#[derive(Debug, Clone, Serialize)]
pub struct CascadeReport {
    /// Ids armed before the cascade, in introspection order.
    pub armed: Vec<String>,
    /// Timers removed by `clear_hierarchy`.
    pub cleared: usize,
    /// Callbacks that ran.
    pub fired: usize,
    /// Ids still armed when the report was taken.
    pub still_active: Vec<String>,
}

/// Arm `parent` plus `plan.children` children, clear the hierarchy after
/// `plan.cascade_after`, then wait past the original delay and count firings.
pub async fn run_timeout_cascade(work: &WorkCoordinator, plan: &CascadePlan) -> CascadeReport {
    let timeouts = work.timeouts();
    let fired = Arc::new(AtomicUsize::new(0));
    let parent = "parent";

    let counter = Arc::clone(&fired);
    timeouts.start_timeout(
        parent,
        plan.delay,
        TimeoutOptions::new()
            .priority(1)
            .description("parent timeout expired"),
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );
    for index in 1..=plan.children {
        let counter = Arc::clone(&fired);
        timeouts.start_timeout(
            format!("child-{index}"),
            plan.delay,
            TimeoutOptions::new()
                .parent(parent)
                .description(format!("child {index} expired")),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
    }
    let armed = timeouts.get_active_timeouts();
    tracing::info!(armed = armed.len(), "timeouts armed");

    tokio::time::sleep(plan.cascade_after).await;
    let cleared = timeouts.clear_hierarchy(parent);
    tracing::info!(cleared, "hierarchy cleared");

    let remaining = plan.delay.saturating_sub(plan.cascade_after);
    tokio::time::sleep(remaining + Duration::from_millis(50)).await;

    CascadeReport {
        armed,
        cleared,
        fired: fired.load(Ordering::SeqCst),
        still_active: timeouts.get_active_timeouts(),
    }
}

/// JSON view of scheduler metrics with ages in milliseconds.
#[must_use]
pub fn metrics_json(metrics: &TaskMetricsSnapshot) -> Value {
    let millis = |age: Option<Duration>| age.map(|age| age.as_millis());
    json!({
        "total_tasks": metrics.total_tasks,
        "idle": metrics.idle,
        "running": metrics.running,
        "completed": metrics.completed,
        "failed": metrics.failed,
        "oldest_queued_age_ms": millis(metrics.oldest_queued_age),
        "longest_running_age_ms": millis(metrics.longest_running_age),
        "processing": metrics.processing,
    })
}
