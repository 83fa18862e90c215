//! relay-timeouts - cancellable delayed callbacks with parent/child cascade.
//!
//! Every timeout has a unique id. Arming an id that is already live replaces
//! the old timer; clearing a parent also clears its direct children.
//! Expired timeouts with a description are forwarded to a
//! [`relay_events::Notifier`].
//!
//! ```no_run
//! use std::time::Duration;
//! use relay_timeouts::{TimeoutCoordinator, TimeoutOptions};
//!
//! # async fn demo() {
//! let coordinator = TimeoutCoordinator::new();
//! coordinator.start_timeout("sync", Duration::from_secs(30), TimeoutOptions::new(), || {});
//! coordinator.start_timeout(
//!     "sync-retry",
//!     Duration::from_secs(10),
//!     TimeoutOptions::new().parent("sync").description("Sync retry timed out"),
//!     || {},
//! );
//! assert_eq!(coordinator.clear_hierarchy("sync"), 2);
//! # }
//! ```

mod coordinated;
mod coordinator;
mod types;

pub use coordinated::CoordinatedTimeout;
pub use coordinator::{TimeoutCoordinator, TimeoutCoordinatorBuilder};
pub use types::{TimeoutOptions, TimeoutRecord};
