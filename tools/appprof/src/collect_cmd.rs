//! `appprof api-collect`: pack an app's recording data into one archive.
//!
//! Runs twice per collection. The outer invocation (shell user) re-runs
//! itself inside the app sandbox with its stdout redirected into the
//! destination file. The inner invocation (`--in-app`) installs the stop
//! signal watcher, writes the archive, and removes the data directory.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{BufWriter, Seek};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use appprof_core::cleaner::remove_data_dir;
use appprof_core::collector::{ArchiveCollector, CHUNK_SIZE};
use appprof_core::sandbox::{ContextSwitcher, RunAsSpawner, strip_value_options};
use appprof_core::stop_signal::StopSignalWatcher;
use appprof_core::uid::ApplicationIdentity;

use crate::cli::{Cli, CollectArgs};
use crate::config::{ToolConfig, config_path};
use crate::verbose::{self, Timer, dprintln, vprintln};

/// Subcommand name, also used when re-invoking inside the sandbox.
pub const COLLECT_COMMAND: &str = "api-collect";

/// Global flags re-applied from the parsed command line for the child.
const GLOBAL_FLAGS: &[&str] = &["-v", "--verbose", "-q", "--quiet"];
const CONFIG_OPTION: &str = "--config";

/// Where the sandboxed invocation writes its archive.
pub enum ArchiveSink {
    /// A descriptor inherited from the outer invocation.
    Fd(OwnedFd),
    /// A path opened by this process.
    Path(PathBuf),
}

/// Which side of the sandbox boundary this invocation runs on.
pub enum ExecutionContext {
    /// Outside the sandbox: delegate to a re-invocation as the app.
    Outer {
        /// Target application.
        app: ApplicationIdentity,
        /// Destination archive path.
        output: PathBuf,
        /// Cancellation descriptor to hand to the child.
        cancel: Option<OwnedFd>,
    },
    /// Inside the sandbox: collect directly.
    Sandboxed {
        /// Archive destination.
        sink: ArchiveSink,
        /// Cancellation descriptor to watch.
        cancel: Option<OwnedFd>,
    },
}

impl ExecutionContext {
    /// Validate the arguments and take ownership of any passed descriptors.
    pub fn from_args(args: &CollectArgs, config: &ToolConfig) -> Result<Self> {
        let output = args.output.clone().unwrap_or_else(|| config.default_output.clone());
        if !args.in_app {
            let Some(app) = args.app.as_deref().filter(|a| !a.is_empty()) else {
                bail!("--app is missing");
            };
            if args.out_fd.is_some() {
                bail!("--out-fd is only valid with --in-app");
            }
            let cancel = args
                .stop_signal_fd
                .map(|fd| adopt_fd(fd, "--stop-signal-fd"))
                .transpose()?;
            return Ok(Self::Outer {
                app: ApplicationIdentity::unresolved(app),
                output,
                cancel,
            });
        }

        let sink = match args.out_fd {
            Some(fd) => ArchiveSink::Fd(adopt_fd(fd, "--out-fd")?),
            None => ArchiveSink::Path(output),
        };
        let cancel = args
            .stop_signal_fd
            .map(|fd| adopt_fd(fd, "--stop-signal-fd"))
            .transpose()?;
        Ok(Self::Sandboxed { sink, cancel })
    }
}

/// Take ownership of a descriptor number passed on the command line.
fn adopt_fd(raw: u32, option: &str) -> Result<OwnedFd> {
    let fd = RawFd::try_from(raw).with_context(|| format!("{option} {raw} is out of range"))?;
    // /proc/self/fd lists exactly the descriptors open in this process.
    std::fs::symlink_metadata(format!("/proc/self/fd/{fd}"))
        .with_context(|| format!("{option} {fd} is not an open file descriptor"))?;
    // SAFETY: the descriptor is open and was passed to this process for its
    // sole use; nothing else in the process owns or closes it.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Arguments that followed the subcommand name on the original command line.
pub fn forwarded_args(argv: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    argv.into_iter()
        .skip(1)
        .skip_while(|a| a.as_os_str() != OsStr::new(COLLECT_COMMAND))
        .skip(1)
        .collect()
}

/// Arguments for the sandboxed re-invocation.
///
/// Global flags and the config path are rebuilt from `cli` wherever they
/// appeared. The config path is made absolute since the child starts in
/// the app's data directory.
pub fn reinvocation_args(
    cli: &Cli,
    argv: impl IntoIterator<Item = OsString>,
    config_path: Option<&Path>,
) -> Result<Vec<OsString>> {
    let mut args = strip_value_options(&forwarded_args(argv), GLOBAL_FLAGS, &[CONFIG_OPTION]);
    if cli.verbose {
        args.push("-v".into());
    }
    if cli.quiet {
        args.push("-q".into());
    }
    if let Some(path) = config_path {
        let path = std::path::absolute(path)
            .with_context(|| format!("resolving config path {}", path.display()))?;
        let mut arg = OsString::from(format!("{CONFIG_OPTION}="));
        arg.push(path);
        args.push(arg);
    }
    Ok(args)
}

/// Run `api-collect`. Returns the process exit code.
pub fn cmd_collect(cli: &Cli, args: &CollectArgs, config: &ToolConfig) -> Result<ExitCode> {
    match ExecutionContext::from_args(args, config)? {
        ExecutionContext::Outer { app, output, cancel } => {
            run_outer(cli, config, &app, &output, cancel)
        }
        ExecutionContext::Sandboxed { sink, cancel } => {
            verbose::mark_in_app();
            run_sandboxed(config, sink, cancel)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_outer(
    cli: &Cli,
    config: &ToolConfig,
    app: &ApplicationIdentity,
    output: &Path,
    cancel: Option<OwnedFd>,
) -> Result<ExitCode> {
    let config_file = config_path(cli.config.as_deref());
    let args = reinvocation_args(cli, std::env::args_os(), config_file.as_deref())?;

    let exe = std::env::current_exe().context("locating own executable")?;
    let spawner = RunAsSpawner::new(config.launcher.clone(), exe);
    vprintln!("  entering sandbox of {} via {}", app.package_name, config.launcher.join(" "));

    let status = ContextSwitcher::new(&spawner)
        .run_in_app_context(app, COLLECT_COMMAND, &args, output, cancel)
        .with_context(|| format!("running {COLLECT_COMMAND} as {}", app.package_name))?;

    match status.code() {
        Some(0) => {
            dprintln!("Recording data written to {}", output.display());
            Ok(ExitCode::SUCCESS)
        }
        Some(code) => {
            eprintln!("error: collection in {} exited with code {code}", app.package_name);
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
        None => {
            eprintln!("error: collection in {} was killed ({status})", app.package_name);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_sandboxed(config: &ToolConfig, sink: ArchiveSink, cancel: Option<OwnedFd>) -> Result<()> {
    // Installed before touching any data so cancellation is honoured throughout.
    if let Some(fd) = cancel {
        StopSignalWatcher::install(fd).context("starting stop signal watcher")?;
    }

    let mut file = match sink {
        ArchiveSink::Fd(fd) => File::from(fd),
        ArchiveSink::Path(path) => {
            File::create(&path).with_context(|| format!("creating {}", path.display()))?
        }
    };
    // The archive writer patches entry headers in place.
    file.stream_position()
        .context("archive destination is not seekable; pass a regular file")?;

    let collector = ArchiveCollector::new(&config.data_dir).with_temp_prefix(config.temp_prefix.as_str());
    let summary = {
        let _t = Timer::start("collect");
        collector
            .collect(BufWriter::with_capacity(CHUNK_SIZE, file))
            .with_context(|| format!("collecting {}", collector.data_dir().display()))?
    };
    for entry in &summary.entries {
        vprintln!("  added {} ({} bytes)", entry.name, entry.bytes);
    }
    for name in &summary.skipped {
        vprintln!("  skipped {name}");
    }
    dprintln!("Collected {} file(s)", summary.entries.len());

    // The archive is complete at this point; a cleanup failure does not undo it.
    remove_data_dir(collector.data_dir())
        .with_context(|| format!("archive complete, but removing {} failed", collector.data_dir().display()))?;
    Ok(())
}
