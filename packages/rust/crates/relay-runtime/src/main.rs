//! relay CLI: scripted scheduler and timeout scenarios.
//!
//! Settings come from `packages/conf/settings.yaml` merged under
//! `<PRJ_CONFIG_HOME>/relay/settings.yaml`. Override the config home with `--conf <dir>`.
//!
//! Logging: set `RUST_LOG=relay=debug` (or `info`, `warn`) to see transitions on stderr.

mod cli;

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use relay_runtime::{
    CascadePlan, SimulationPlan, WorkCoordinator, load_runtime_settings, run_simulation,
    run_timeout_cascade, runtime_settings_paths, set_config_home_override,
};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Some(conf_dir) = cli.conf.clone() {
        set_config_home_override(conf_dir);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "relay=debug,relay_runtime=debug,relay_tasks=debug,relay_timeouts=debug"
        } else {
            "relay=info,relay_runtime=info,relay_tasks=info,relay_timeouts=info"
        })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let mut settings = load_runtime_settings();

    match cli.command {
        Command::Settings => {
            let (system_path, user_path) = runtime_settings_paths();
            let output = serde_json::json!({
                "system_path": system_path.display().to_string(),
                "user_path": user_path.display().to_string(),
                "settings": settings,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Command::Simulate {
            tasks,
            duration_ms,
            steps,
            fail_every,
            max_concurrent,
        } => {
            if max_concurrent.is_some() {
                settings.scheduler.max_concurrent = max_concurrent;
            }
            let work = WorkCoordinator::from_settings(settings);
            let logger = work
                .settings()
                .log_events()
                .then(|| work.spawn_event_logger());
            let plan = SimulationPlan {
                tasks,
                task_duration: Duration::from_millis(duration_ms),
                progress_steps: steps,
                fail_every,
            };
            let report = run_simulation(&work, &plan).await?;
            work.shutdown().await;
            if let Some(logger) = logger {
                logger.abort();
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Timeouts {
            children,
            delay_ms,
            cascade_after_ms,
        } => {
            let work = WorkCoordinator::from_settings(settings);
            let logger = work
                .settings()
                .log_events()
                .then(|| work.spawn_event_logger());
            let plan = CascadePlan {
                children,
                delay: Duration::from_millis(delay_ms),
                cascade_after: Duration::from_millis(cascade_after_ms),
            };
            let report = run_timeout_cascade(&work, &plan).await;
            work.shutdown().await;
            if let Some(logger) = logger {
                logger.abort();
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
