//! relay runtime: YAML settings, component assembly and scripted scenarios.
//!
//! - **settings**: system defaults merged under user overrides.
//! - **work**: [`WorkCoordinator`] owning the bus, scheduler and timeout coordinator.
//! - **scenarios**: batches the `relay` CLI drives through a coordinator.

mod scenarios;
mod settings;
mod work;

pub use scenarios::{
    CascadePlan, CascadeReport, SimulationPlan, SimulationReport, metrics_json,
    run_simulation, run_timeout_cascade,
};
pub use settings::{
    EventSettings, RuntimeSettings, SchedulerSettings, TimeoutSettings, load_runtime_settings,
    load_runtime_settings_from_paths, runtime_settings_paths, set_config_home_override,
};
pub use work::WorkCoordinator;
