//! Re-entering the target app's sandbox.
//!
//! Recording data lives in the app's private directory, which only the app
//! itself can read. The outer invocation therefore re-runs the same command
//! as the app and relays the archive back: the child's standard output is
//! the destination file, and the caller's cancellation descriptor (if any)
//! becomes the child's standard input.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use crate::error::{Error, Result};
use crate::uid::ApplicationIdentity;

/// Flag telling the child it already runs inside the sandbox.
pub const IN_APP_FLAG: &str = "--in-app";
/// Option naming the descriptor the child writes the archive to.
pub const OUT_FD_OPTION: &str = "--out-fd";
/// Option naming the descriptor the child watches for cancellation.
pub const STOP_SIGNAL_FD_OPTION: &str = "--stop-signal-fd";

/// Options the switcher rewrites; stripped from forwarded arguments.
const MANAGED_VALUE_OPTIONS: &[&str] = &["-o", "--output", OUT_FD_OPTION, STOP_SIGNAL_FD_OPTION];

/// Spawns a command inside an application's sandbox.
pub trait SandboxSpawner {
    /// Run `argv` as `app`, with `output` as standard output and `cancel` as
    /// standard input. Blocks until the child exits.
    fn spawn(
        &self,
        app: &ApplicationIdentity,
        argv: &[OsString],
        output: File,
        cancel: Option<OwnedFd>,
    ) -> Result<ExitStatus>;
}

/// Spawns via `run-as <package> <exe> <argv...>`.
pub struct RunAsSpawner {
    launcher: Vec<String>,
    exe: PathBuf,
}

impl RunAsSpawner {
    /// `launcher` is the argv prefix placed before the package name
    /// (normally `["run-as"]`); `exe` is the binary to re-run.
    pub fn new(launcher: Vec<String>, exe: impl Into<PathBuf>) -> Self {
        Self {
            launcher,
            exe: exe.into(),
        }
    }

    /// Build the command without running it.
    pub fn command(&self, app: &ApplicationIdentity, argv: &[OsString]) -> Result<Command> {
        let (program, prefix) = self.launcher.split_first().ok_or_else(|| Error::InvalidValue {
            what: "sandbox launcher",
            value: String::new(),
        })?;
        let mut cmd = Command::new(program);
        cmd.args(prefix).arg(&app.package_name).arg(&self.exe).args(argv);
        Ok(cmd)
    }
}

impl SandboxSpawner for RunAsSpawner {
    fn spawn(
        &self,
        app: &ApplicationIdentity,
        argv: &[OsString],
        output: File,
        cancel: Option<OwnedFd>,
    ) -> Result<ExitStatus> {
        let stdin = cancel.map_or_else(Stdio::null, Stdio::from);
        self.command(app, argv)?
            .stdin(stdin)
            .stdout(Stdio::from(output))
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| Error::Spawn {
                program: self.launcher.join(" "),
                source,
            })
    }
}

/// Remove the options the switcher manages from `args`.
///
/// Handles both `--opt value` and `--opt=value` forms. Arguments need not be
/// valid UTF-8.
pub fn strip_managed_args(args: &[OsString]) -> Vec<OsString> {
    strip_value_options(args, &[IN_APP_FLAG], MANAGED_VALUE_OPTIONS)
}

/// Remove each of `flags`, and each of `options` together with its value.
pub fn strip_value_options(args: &[OsString], flags: &[&str], options: &[&str]) -> Vec<OsString> {
    let mut result = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if flags.iter().any(|flag| arg.as_os_str() == OsStr::new(flag)) {
            continue;
        }
        if options.iter().any(|opt| arg.as_os_str() == OsStr::new(opt)) {
            skip_next = true;
            continue;
        }
        let bytes = arg.as_encoded_bytes();
        let inline = options.iter().any(|opt| {
            bytes
                .strip_prefix(opt.as_bytes())
                .is_some_and(|rest| rest.starts_with(b"="))
        });
        if inline {
            continue;
        }
        result.push(arg.clone());
    }
    result
}

/// Runs a collection command inside the app sandbox.
pub struct ContextSwitcher<'a> {
    spawner: &'a dyn SandboxSpawner,
}

impl<'a> ContextSwitcher<'a> {
    /// Use `spawner` to enter the sandbox.
    pub fn new(spawner: &'a dyn SandboxSpawner) -> Self {
        Self { spawner }
    }

    /// Child argv: `command`, the forwarded arguments, then the in-app flag
    /// and descriptor options.
    pub fn child_args(command: &str, original_args: &[OsString], has_cancel: bool) -> Vec<OsString> {
        let mut argv = vec![OsString::from(command)];
        argv.extend(strip_managed_args(original_args));
        argv.push(IN_APP_FLAG.into());
        argv.extend([OUT_FD_OPTION.into(), "1".into()]);
        if has_cancel {
            argv.extend([STOP_SIGNAL_FD_OPTION.into(), "0".into()]);
        }
        argv
    }

    /// Create `output_path` and re-run `command` as `app`, writing into it.
    ///
    /// Returns the child's exit status unchanged.
    pub fn run_in_app_context(
        &self,
        app: &ApplicationIdentity,
        command: &str,
        original_args: &[OsString],
        output_path: &Path,
        cancel: Option<OwnedFd>,
    ) -> Result<ExitStatus> {
        let output = File::create(output_path).map_err(|e| Error::file("create", output_path, e))?;
        let argv = Self::child_args(command, original_args, cancel.is_some());
        self.spawner.spawn(app, &argv, output, cancel)
    }
}
