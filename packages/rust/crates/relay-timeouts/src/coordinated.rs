use std::time::Duration;

use crate::coordinator::TimeoutCoordinator;
use crate::types::TimeoutOptions;

/// Component-scoped handle that remembers its most recent timeout.
///
/// `clear` needs no id, and dropping the handle clears whatever is still
/// armed, so a component cannot leak a timer past its own teardown.
pub struct CoordinatedTimeout {
    coordinator: TimeoutCoordinator,
    current: Option<String>,
}

impl CoordinatedTimeout {
    /// Bind a handle to `coordinator`.
    #[must_use]
    pub fn new(coordinator: TimeoutCoordinator) -> Self {
        Self {
            coordinator,
            current: None,
        }
    }

    /// Arm a timeout with a generated id and remember it.
    ///
    /// The previously remembered timeout, if still armed, is cleared first.
    pub fn start<F>(&mut self, delay: Duration, options: TimeoutOptions, on_timeout: F) -> String
    where
        F: FnOnce() + Send + 'static,
    {
        self.clear();
        let id = self
            .coordinator
            .start_anonymous_timeout(delay, options, on_timeout);
        self.current = Some(id.clone());
        id
    }

    /// Arm a timeout under `id` and remember it.
    ///
    /// A previously remembered timeout under a different id is cleared first;
    /// the same id is replaced by the coordinator itself.
    pub fn start_with_id<F>(
        &mut self,
        id: impl Into<String>,
        delay: Duration,
        options: TimeoutOptions,
        on_timeout: F,
    ) -> String
    where
        F: FnOnce() + Send + 'static,
    {
        let id = id.into();
        if self.current.as_deref() != Some(id.as_str()) {
            self.clear();
        }
        let id = self.coordinator.start_timeout(id, delay, options, on_timeout);
        self.current = Some(id.clone());
        id
    }

    /// Clear the remembered timeout. Returns whether one was still armed.
    pub fn clear(&mut self) -> bool {
        self.current
            .take()
            .is_some_and(|id| self.coordinator.clear_timeout(&id))
    }

    /// Id of the most recently started timeout, if not cleared through this handle.
    #[must_use]
    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }
}

impl Drop for CoordinatedTimeout {
    fn drop(&mut self) {
        self.clear();
    }
}
