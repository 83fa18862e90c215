//! Process-lifetime owner of the event bus, task scheduler and timeout coordinator.

use std::sync::Arc;

use relay_events::{BusNotifier, EventBus};
use relay_tasks::TaskScheduler;
use relay_timeouts::TimeoutCoordinator;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::settings::RuntimeSettings;

/// Assembled coordination layer.
///
/// Created once at startup and passed by reference to the features that
/// submit work. Scheduler and coordinator are peers sharing one bus.
pub struct WorkCoordinator {
    settings: RuntimeSettings,
    events: EventBus,
    scheduler: TaskScheduler,
    timeouts: TimeoutCoordinator,
}

impl WorkCoordinator {
    /// Build every component from merged settings. Must run inside a Tokio runtime.
    #[must_use]
    pub fn from_settings(settings: RuntimeSettings) -> Self {
        let events = EventBus::new(settings.bus_capacity());
        let scheduler = TaskScheduler::with_events(settings.scheduler_config(), events.clone());

        let mut builder = TimeoutCoordinator::builder().events(events.clone());
        if settings.notify_on_bus() {
            builder = builder.notifier(Arc::new(BusNotifier::new(events.clone())));
        }
        let timeouts = builder.build();

        tracing::debug!(
            max_concurrent = scheduler.config().max_concurrent,
            keep_completed = scheduler.config().keep_completed,
            bus_capacity = events.capacity(),
            "work coordinator assembled"
        );
        Self {
            settings,
            events,
            scheduler,
            timeouts,
        }
    }

    /// Effective settings this coordinator was built from.
    #[must_use]
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Shared lifecycle bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Background task scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Timeout coordinator.
    #[must_use]
    pub fn timeouts(&self) -> &TimeoutCoordinator {
        &self.timeouts
    }

    /// Log every lifecycle event at debug level until the bus closes.
    pub fn spawn_event_logger(&self) -> JoinHandle<()> {
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => tracing::debug!(
                        source = %event.source,
                        topic = %event.topic,
                        payload = %event.payload,
                        "relay event"
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event logger lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Clear every pending timeout and wait for queued and running tasks to settle.
    pub async fn shutdown(&self) {
        let cleared = self.timeouts.clear_all();
        self.scheduler.wait_until_idle().await;
        tracing::info!(cleared_timeouts = cleared, "work coordinator drained");
    }
}
