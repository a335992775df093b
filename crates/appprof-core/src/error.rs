//! Error types for provisioning and collection.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

/// Errors that can occur while preparing or collecting a profiling session.
#[derive(Debug)]
pub enum Error {
    /// An operation on a specific filesystem path failed.
    File {
        /// What was being attempted (e.g. "open", "write").
        op: &'static str,
        /// The path involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// I/O error on an already-open stream.
    Io(io::Error),
    /// An external helper program could not be started or its output read.
    Spawn {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// An external helper program ran but reported failure.
    CommandFailed {
        /// Program name.
        program: String,
        /// Exit status of the program.
        status: ExitStatus,
    },
    /// The package listing contains no entry for the requested package.
    PackageNotFound(String),
    /// A value read from the system or a store could not be parsed.
    InvalidValue {
        /// What the value describes.
        what: &'static str,
        /// The raw value.
        value: String,
    },
    /// Kernel perf events remain restricted after trying to relax them.
    PerfRestricted {
        /// Last observed `perf_event_paranoid` level, if readable.
        paranoid: Option<i32>,
    },
    /// The ZIP writer rejected an entry or failed to finish the archive.
    Archive(zip::result::ZipError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { op, path, source } => {
                write!(f, "failed to {op} {}: {source}", path.display())
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Spawn { program, source } => write!(f, "failed to run `{program}`: {source}"),
            Self::CommandFailed { program, status } => write!(f, "`{program}` failed ({status})"),
            Self::PackageNotFound(name) => write!(f, "failed to find package {name}"),
            Self::InvalidValue { what, value } => write!(f, "invalid {what}: {value:?}"),
            Self::PerfRestricted { paranoid } => {
                if let Some(level) = paranoid {
                    write!(f, "perf events are restricted (perf_event_paranoid is {level}); ")?;
                } else {
                    write!(f, "perf events are restricted; ")?;
                }
                write!(f, "try `adb shell setprop security.perf_harden 0`")
            }
            Self::Archive(e) => write!(f, "archive error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File { source, .. } | Self::Spawn { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            Self::Archive(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e)
    }
}

impl Error {
    /// Wrap an I/O error with the operation and path it occurred on.
    pub fn file(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
