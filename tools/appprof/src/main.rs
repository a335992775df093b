//! appprof: app-scoped profiling session tool.
//!
//! `api-prepare` grants an application permission to sample itself;
//! `api-collect` gathers the recording data it produced into one ZIP archive.

mod cli;
mod collect_cmd;
mod config;
mod prepare_cmd;
mod verbose;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    verbose::init(cli.quiet, cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &cli::Cli) -> Result<ExitCode> {
    let config = config::ToolConfig::load(cli.config.as_deref())?;

    match cli.command {
        cli::Command::Prepare(ref args) => {
            prepare_cmd::cmd_prepare(args, &config)?;
            Ok(ExitCode::SUCCESS)
        }
        cli::Command::Collect(ref args) => collect_cmd::cmd_collect(cli, args, &config),
    }
}
