//! Command-line interface definitions for appprof.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Prepare and collect app-scoped profiling sessions.
#[derive(Parser)]
#[command(name = "appprof", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (default: $APPPROF_CONFIG, else built-in defaults).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Only report errors.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Report each step, entry, and timing.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Prepare recording via the app API.
    #[command(name = "api-prepare")]
    Prepare(PrepareArgs),
    /// Collect recording data generated via the app API.
    #[command(name = "api-collect")]
    Collect(CollectArgs),
}

/// Arguments for `api-prepare`.
#[derive(Parser)]
pub struct PrepareArgs {
    /// The application to record via the app API.
    #[arg(long)]
    pub app: Option<String>,

    /// How many days the recording permission lasts. Without it (or on
    /// Android < 13) the permission is reset on reboot.
    #[arg(long)]
    pub days: Option<u64>,
}

/// Arguments for `api-collect`.
#[derive(Parser)]
pub struct CollectArgs {
    /// The application having recording data.
    #[arg(long)]
    pub app: Option<String>,

    /// Path to store the recording data (default: appprof_data.zip).
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Already running in the app's context.
    #[arg(long, hide = true)]
    pub in_app: bool,

    /// Write the archive to this file descriptor.
    #[arg(long, hide = true)]
    pub out_fd: Option<u32>,

    /// Stop collecting when this file descriptor becomes readable.
    #[arg(long, hide = true)]
    pub stop_signal_fd: Option<u32>,
}
