//! Diagnostic output levels.
//!
//! - **Quiet** (`-q`): errors only
//! - **Default**: one line per phase
//! - **Verbose** (`-v`): every step, archive entry, and timing
//!
//! Everything goes to stderr: in the sandboxed collect invocation stdout is
//! the archive. The outer and sandboxed invocations share one stderr, so
//! lines from the sandboxed side carry an `[in-app]` tag.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet = 0,
    Default = 1,
    Verbose = 2,
}

impl Verbosity {
    /// Level selected by the `-q`/`-v` flags. Quiet wins.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if verbose {
            Self::Verbose
        } else {
            Self::Default
        }
    }
}

static VERBOSITY: AtomicU8 = AtomicU8::new(Verbosity::Default as u8);
static IN_APP: AtomicBool = AtomicBool::new(false);

/// Initialize the verbosity level for the current process.
pub fn init(quiet: bool, verbose: bool) {
    VERBOSITY.store(Verbosity::from_flags(quiet, verbose) as u8, Ordering::Relaxed);
}

/// Tag every later line as coming from the sandboxed invocation.
pub fn mark_in_app() {
    IN_APP.store(true, Ordering::Relaxed);
}

/// Line prefix for the current side of the sandbox boundary.
pub fn tag() -> &'static str {
    if IN_APP.load(Ordering::Relaxed) {
        "[in-app] "
    } else {
        ""
    }
}

/// Returns the current verbosity level.
pub fn verbosity() -> Verbosity {
    match VERBOSITY.load(Ordering::Relaxed) {
        0 => Verbosity::Quiet,
        2 => Verbosity::Verbose,
        _ => Verbosity::Default,
    }
}

/// Returns `true` if verbose mode is active.
pub fn is_verbose() -> bool {
    verbosity() == Verbosity::Verbose
}

/// Returns `true` if quiet mode is active.
pub fn is_quiet() -> bool {
    verbosity() == Verbosity::Quiet
}

/// Print a tagged line to stderr only when verbose mode is enabled.
///
/// Usage mirrors `eprintln!`:
/// ```ignore
/// vprintln!("  added {} ({} bytes)", entry.name, entry.bytes);
/// ```
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::is_verbose() {
            eprintln!("{}{}", $crate::verbose::tag(), format_args!($($arg)*));
        }
    };
}

pub(crate) use vprintln;

/// Print a tagged line to stderr unless quiet mode is enabled.
///
/// ```ignore
/// dprintln!("Collected {} file(s)", summary.entries.len());
/// ```
macro_rules! dprintln {
    ($($arg:tt)*) => {
        if !$crate::verbose::is_quiet() {
            eprintln!("{}{}", $crate::verbose::tag(), format_args!($($arg)*));
        }
    };
}

pub(crate) use dprintln;

/// RAII timer that prints elapsed duration on drop when verbose mode is active.
///
/// ```ignore
/// let _t = Timer::start("collect");
/// // ... archive the data directory ...
/// // prints "  collect: 1.2s" on drop
/// ```
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    /// Begin timing a labeled operation.
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if is_verbose() {
            eprintln!("{}  {}: {:.1?}", tag(), self.label, self.start.elapsed());
        }
    }
}
