//! Registry of armed delayed callbacks.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use relay_events::{
    EventBus, Notifier, TimeoutNotice, epoch_millis, panic_message, sources, topics,
};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::types::{TimeoutOptions, TimeoutRecord};

/// Deadline used when `now + delay` overflows the clock (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Arms, cancels and cascades delayed callbacks.
///
/// Every armed timer is a sleeping Tokio task paired with a registry entry
/// tagged by a generation number. Firing removes the entry only when the
/// generation still matches, and clearing removes it and aborts the sleeper
/// under the same lock, so a cleared timer can never fire. Callbacks run
/// after the lock is released and may use the coordinator themselves.
///
/// Arming spawns onto the ambient Tokio runtime.
#[derive(Clone)]
pub struct TimeoutCoordinator {
    shared: Arc<Shared>,
}

struct Shared {
    timers: Mutex<HashMap<String, ArmedTimer>>,
    next_generation: AtomicU64,
    notifier: Option<Arc<dyn Notifier>>,
    events: Option<EventBus>,
}

struct ArmedTimer {
    record: TimeoutRecord,
    generation: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

/// Builder wiring optional collaborators into a [`TimeoutCoordinator`].
#[derive(Default)]
#[must_use]
pub struct TimeoutCoordinatorBuilder {
    notifier: Option<Arc<dyn Notifier>>,
    events: Option<EventBus>,
}

impl TimeoutCoordinatorBuilder {
    /// Forward descriptions of expired timeouts to `notifier`.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Publish lifecycle events on `events`.
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Finish building.
    pub fn build(self) -> TimeoutCoordinator {
        TimeoutCoordinator {
            shared: Arc::new(Shared {
                timers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                notifier: self.notifier,
                events: self.events,
            }),
        }
    }
}

impl Default for TimeoutCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeoutCoordinator {
    /// Coordinator without notifier or events.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a coordinator.
    pub fn builder() -> TimeoutCoordinatorBuilder {
        TimeoutCoordinatorBuilder::default()
    }

    /// Arm `on_timeout` to run once after `delay` under `id`.
    ///
    /// A live timer with the same id is cancelled first, in the same critical
    /// section, so two timers never share an id. Returns the id.
    pub fn start_timeout<F>(
        &self,
        id: impl Into<String>,
        delay: Duration,
        options: TimeoutOptions,
        on_timeout: F,
    ) -> String
    where
        F: FnOnce() + Send + 'static,
    {
        let id = id.into();
        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let start_time = Utc::now();
        let record = TimeoutRecord {
            id: id.clone(),
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            start_time,
            expiry_time: TimeDelta::from_std(delay)
                .ok()
                .and_then(|delta| start_time.checked_add_signed(delta))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            parent_id: options.parent_id,
            priority: options.priority,
            description: options.description,
        };
        let payload = json!({
            "id": id,
            "delay_ms": record.delay_ms,
            "parent_id": record.parent_id,
        });

        let replaced = {
            let mut timers = self.lock_timers();
            let replaced = timers.remove(&id);
            if let Some(previous) = &replaced {
                previous.handle.abort();
            }

            let weak = Arc::downgrade(&self.shared);
            let timer_id = id.clone();
            let now = Instant::now();
            let deadline = now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE);
            let handle = tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                fire(&weak, &timer_id, generation, on_timeout);
            });
            timers.insert(
                id.clone(),
                ArmedTimer {
                    record,
                    generation,
                    deadline,
                    handle,
                },
            );
            replaced.is_some()
        };

        if replaced {
            tracing::debug!(timeout_id = %id, "timeout re-armed; previous timer cancelled");
            self.shared
                .publish(topics::TIMEOUT_CLEARED, json!({ "id": id, "replaced": true }));
        }
        tracing::trace!(timeout_id = %id, delay_ms = %delay.as_millis(), "timeout armed");
        self.shared.publish(topics::TIMEOUT_STARTED, payload);
        id
    }

    /// Delay-first form of [`Self::start_timeout`] with a generated
    /// `timeout-<epoch_ms>-<seq>` id.
    pub fn start_anonymous_timeout<F>(
        &self,
        delay: Duration,
        options: TimeoutOptions,
        on_timeout: F,
    ) -> String
    where
        F: FnOnce() + Send + 'static,
    {
        let seq = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let id = format!("timeout-{}-{seq}", epoch_millis());
        self.start_timeout(id, delay, options, on_timeout)
    }

    /// Cancel a pending timeout. Its callback will not run afterwards.
    ///
    /// Unknown ids are ignored. Returns whether a timer was cleared.
    pub fn clear_timeout(&self, id: &str) -> bool {
        let cleared = {
            let mut timers = self.lock_timers();
            timers.remove(id).inspect(|timer| timer.handle.abort())
        };
        if cleared.is_some() {
            tracing::trace!(timeout_id = %id, "timeout cleared");
            self.shared.publish(topics::TIMEOUT_CLEARED, json!({ "id": id }));
        }
        cleared.is_some()
    }

    /// Clear `parent_id` and every timeout whose direct parent it is.
    ///
    /// Grandchildren are untouched: each record only knows its immediate
    /// parent. Returns how many timers were cleared.
    pub fn clear_hierarchy(&self, parent_id: &str) -> usize {
        let cleared: Vec<String> = {
            let mut timers = self.lock_timers();
            let doomed: Vec<String> = timers
                .iter()
                .filter(|(id, timer)| {
                    id.as_str() == parent_id || timer.record.parent_id.as_deref() == Some(parent_id)
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &doomed {
                if let Some(timer) = timers.remove(id) {
                    timer.handle.abort();
                }
            }
            doomed
        };

        if !cleared.is_empty() {
            tracing::debug!(parent_id, cleared = cleared.len(), "timeout hierarchy cleared");
        }
        for id in &cleared {
            self.shared.publish(
                topics::TIMEOUT_CLEARED,
                json!({ "id": id, "cascade_from": parent_id }),
            );
        }
        cleared.len()
    }

    /// Clear every pending timeout. Returns how many were cleared.
    pub fn clear_all(&self) -> usize {
        let drained: Vec<String> = {
            let mut timers = self.lock_timers();
            timers
                .drain()
                .map(|(id, timer)| {
                    timer.handle.abort();
                    id
                })
                .collect()
        };
        for id in &drained {
            self.shared.publish(topics::TIMEOUT_CLEARED, json!({ "id": id }));
        }
        drained.len()
    }

    /// Ids of every armed timeout, highest priority first, then soonest expiry.
    #[must_use]
    pub fn get_active_timeouts(&self) -> Vec<String> {
        self.timeouts().into_iter().map(|record| record.id).collect()
    }

    /// Record snapshots in the same order as [`Self::get_active_timeouts`].
    #[must_use]
    pub fn timeouts(&self) -> Vec<TimeoutRecord> {
        let timers = self.lock_timers();
        let mut armed: Vec<&ArmedTimer> = timers.values().collect();
        armed.sort_by(|a, b| {
            b.record
                .priority
                .cmp(&a.record.priority)
                .then(a.deadline.cmp(&b.deadline))
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        armed.into_iter().map(|timer| timer.record.clone()).collect()
    }

    /// Snapshot of one armed timeout.
    #[must_use]
    pub fn timeout(&self, id: &str) -> Option<TimeoutRecord> {
        self.lock_timers().get(id).map(|timer| timer.record.clone())
    }

    /// Time left before `id` fires.
    #[must_use]
    pub fn time_remaining(&self, id: &str) -> Option<Duration> {
        self.lock_timers()
            .get(id)
            .map(|timer| timer.deadline.saturating_duration_since(Instant::now()))
    }

    /// Number of armed timeouts.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock_timers().len()
    }

    /// Whether `id` is armed.
    #[must_use]
    pub fn is_active(&self, id: &str) -> bool {
        self.lock_timers().contains_key(id)
    }

    fn lock_timers(&self) -> MutexGuard<'_, HashMap<String, ArmedTimer>> {
        self.shared.lock_timers()
    }
}

impl Shared {
    fn lock_timers(&self) -> MutexGuard<'_, HashMap<String, ArmedTimer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, topic: &str, payload: Value) {
        if let Some(events) = &self.events {
            events.emit(sources::TIMEOUT_COORDINATOR, topic, payload);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
    }
}

/// Expiry path: claim the entry, run the callback, then notify.
fn fire<F>(shared: &Weak<Shared>, id: &str, generation: u64, on_timeout: F)
where
    F: FnOnce(),
{
    // The coordinator is gone: nothing left to report to.
    let Some(shared) = shared.upgrade() else {
        return;
    };

    let claimed = {
        let mut timers = shared.lock_timers();
        match timers.get(id) {
            Some(timer) if timer.generation == generation => {
                timers.remove(id).map(|timer| timer.record)
            }
            _ => None,
        }
    };
    let Some(record) = claimed else {
        return;
    };

    if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(on_timeout)) {
        tracing::error!(
            timeout_id = %id,
            panic = %panic_message(payload.as_ref()),
            "timeout callback panicked; other timers unaffected"
        );
    }
    shared.publish(topics::TIMEOUT_FIRED, json!({ "id": id }));

    let Some(notifier) = &shared.notifier else {
        return;
    };
    let Some(description) = record.description.filter(|text| !text.trim().is_empty()) else {
        return;
    };
    let notice = TimeoutNotice {
        timeout_id: record.id,
        description,
    };
    if std::panic::catch_unwind(AssertUnwindSafe(|| notifier.notify(notice))).is_err() {
        tracing::error!(timeout_id = %id, "timeout notifier panicked");
    }
}
