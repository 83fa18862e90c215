use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Drive the relay task scheduler and timeout coordinator from the command line.")]
pub(crate) struct Cli {
    /// Override config directory (defaults to `PRJ_CONFIG_HOME` or `.config`).
    #[arg(long, global = true)]
    pub(crate) conf: Option<PathBuf>,

    /// Debug-level logging for relay crates (`RUST_LOG` still wins).
    #[arg(long, short, global = true)]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a scripted batch of tasks through the scheduler and print the records.
    Simulate {
        /// Number of tasks to submit
        #[arg(long, default_value_t = 6)]
        tasks: usize,

        /// Milliseconds each task runs
        #[arg(long, default_value_t = 200)]
        duration_ms: u64,

        /// Progress updates per task
        #[arg(long, default_value_t = 4)]
        steps: u8,

        /// Fail every n-th task (0 = never)
        #[arg(long, default_value_t = 0)]
        fail_every: usize,

        /// Override `scheduler.max_concurrent` from settings
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
    /// Arm a parent timeout with children, cascade-clear it, and report.
    Timeouts {
        /// Number of child timeouts under the parent
        #[arg(long, default_value_t = 3)]
        children: usize,

        /// Delay of every timeout in milliseconds
        #[arg(long, default_value_t = 500)]
        delay_ms: u64,

        /// Clear the hierarchy after this many milliseconds
        #[arg(long, default_value_t = 100)]
        cascade_after_ms: u64,
    },
    /// Print the effective merged settings as JSON.
    Settings,
}
