//! Runtime settings loader for relay.
//!
//! Loads and merges:
//! - System defaults: `<PRJ_ROOT>/packages/conf/settings.yaml`
//! - User overrides:  `<PRJ_CONFIG_HOME>/relay/settings.yaml`
//!
//! Merge precedence is user over system. Missing fields fall back to the
//! library defaults when the settings are resolved into component configs.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use relay_events::DEFAULT_BUS_CAPACITY;
use relay_tasks::TaskSchedulerConfig;
use serde::{Deserialize, Serialize};

const DEFAULT_SYSTEM_SETTINGS_RELATIVE_PATH: &str = "packages/conf/settings.yaml";
const DEFAULT_USER_SETTINGS_RELATIVE_PATH: &str = "relay/settings.yaml";
const DEFAULT_CONFIG_HOME_RELATIVE_PATH: &str = ".config";
static CONFIG_HOME_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

/// Merged settings for every relay component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Background task scheduler.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Timeout coordinator.
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    /// Lifecycle event bus.
    #[serde(default)]
    pub events: EventSettings,
}

/// `scheduler:` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Tasks allowed to run at once (clamped to at least 1).
    pub max_concurrent: Option<usize>,
    /// Completed records kept before the oldest are pruned.
    pub keep_completed: Option<usize>,
    /// Pending-queue limit; unset or `0` means unbounded.
    pub queue_capacity: Option<usize>,
    /// Per-task execution limit in milliseconds; unset or `0` disables it.
    pub task_timeout_ms: Option<u64>,
}

/// `timeouts:` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Republish expired-timeout descriptions on the event bus.
    pub notify_on_bus: Option<bool>,
}

/// `events:` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSettings {
    /// Broadcast buffer per subscriber before the oldest events are dropped.
    pub bus_capacity: Option<usize>,
    /// Log every lifecycle event at debug level.
    pub log_events: Option<bool>,
}

impl RuntimeSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            scheduler: self.scheduler.merge(overlay.scheduler),
            timeouts: self.timeouts.merge(overlay.timeouts),
            events: self.events.merge(overlay.events),
        }
    }

    /// Scheduler config with library defaults filling unset fields.
    #[must_use]
    pub fn scheduler_config(&self) -> TaskSchedulerConfig {
        let defaults = TaskSchedulerConfig::default();
        TaskSchedulerConfig {
            max_concurrent: self
                .scheduler
                .max_concurrent
                .unwrap_or(defaults.max_concurrent)
                .max(1),
            keep_completed: self
                .scheduler
                .keep_completed
                .unwrap_or(defaults.keep_completed),
            queue_capacity: self
                .scheduler
                .queue_capacity
                .filter(|capacity| *capacity > 0),
            task_timeout: self
                .scheduler
                .task_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }

    /// Event bus capacity, at least 1.
    #[must_use]
    pub fn bus_capacity(&self) -> usize {
        self.events
            .bus_capacity
            .unwrap_or(DEFAULT_BUS_CAPACITY)
            .max(1)
    }

    /// Whether expired-timeout notices go out on the bus (default on).
    #[must_use]
    pub fn notify_on_bus(&self) -> bool {
        self.timeouts.notify_on_bus.unwrap_or(true)
    }

    /// Whether lifecycle events are logged (default off).
    #[must_use]
    pub fn log_events(&self) -> bool {
        self.events.log_events.unwrap_or(false)
    }
}

impl SchedulerSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            max_concurrent: overlay.max_concurrent.or(self.max_concurrent),
            keep_completed: overlay.keep_completed.or(self.keep_completed),
            queue_capacity: overlay.queue_capacity.or(self.queue_capacity),
            task_timeout_ms: overlay.task_timeout_ms.or(self.task_timeout_ms),
        }
    }
}

impl TimeoutSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            notify_on_bus: overlay.notify_on_bus.or(self.notify_on_bus),
        }
    }
}

impl EventSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            bus_capacity: overlay.bus_capacity.or(self.bus_capacity),
            log_events: overlay.log_events.or(self.log_events),
        }
    }
}

/// Load merged settings from the default system and user locations.
#[must_use]
pub fn load_runtime_settings() -> RuntimeSettings {
    let (system_path, user_path) = runtime_settings_paths();
    load_runtime_settings_from_paths(&system_path, &user_path)
}

/// System and user settings paths, in merge order.
#[doc(hidden)]
#[must_use]
pub fn runtime_settings_paths() -> (PathBuf, PathBuf) {
    let root = project_root();
    let system_path = root.join(DEFAULT_SYSTEM_SETTINGS_RELATIVE_PATH);
    let user_path = resolve_config_home(&root).join(DEFAULT_USER_SETTINGS_RELATIVE_PATH);
    (system_path, user_path)
}

/// Load `system` and merge `user` over it. Missing files count as empty.
#[doc(hidden)]
#[must_use]
pub fn load_runtime_settings_from_paths(system: &Path, user: &Path) -> RuntimeSettings {
    load_one(system).merge(load_one(user))
}

fn load_one(path: &Path) -> RuntimeSettings {
    if !path.exists() {
        return RuntimeSettings::default();
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "failed to read settings file; ignoring"
            );
            return RuntimeSettings::default();
        }
    };
    if raw.trim().is_empty() {
        return RuntimeSettings::default();
    }
    match serde_yaml::from_str::<RuntimeSettings>(&raw) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "failed to parse settings yaml; ignoring file"
            );
            RuntimeSettings::default()
        }
    }
}

fn project_root() -> PathBuf {
    std::env::var("PRJ_ROOT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map_or_else(
            || std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            PathBuf::from,
        )
}

/// Set config-home override (used by CLI `--conf`).
///
/// The path can be absolute, or relative to `PRJ_ROOT`/cwd. Only the first
/// override sticks.
pub fn set_config_home_override(path: impl Into<PathBuf>) {
    let path = path.into();
    if path.as_os_str().is_empty() {
        return;
    }
    let Err(ignored) = CONFIG_HOME_OVERRIDE.set(path) else {
        return;
    };
    if let Some(current) = CONFIG_HOME_OVERRIDE.get().filter(|current| **current != ignored) {
        tracing::warn!(
            current = %current.display(),
            ignored = %ignored.display(),
            "config home override already set; ignoring subsequent value"
        );
    }
}

fn resolve_config_home(project_root: &Path) -> PathBuf {
    if let Some(path) = CONFIG_HOME_OVERRIDE.get() {
        return absolutize(project_root, path.clone());
    }

    let configured = std::env::var("PRJ_CONFIG_HOME")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_HOME_RELATIVE_PATH.to_string());
    absolutize(project_root, PathBuf::from(configured))
}

fn absolutize(project_root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        project_root.join(path)
    }
}
