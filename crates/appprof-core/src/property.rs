//! System property access.
//!
//! The profiling service talks to the platform through a handful of system
//! properties (build version, `security.perf_harden`, the persisted grant).
//! [`PropertyService`] abstracts the store; [`AndroidProperties`] shells out
//! to `getprop`/`setprop`.

use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// Read/write access to the platform's key-value property store.
pub trait PropertyService {
    /// Read a property. Returns `None` when it is unset or empty.
    fn get(&self, name: &str) -> Result<Option<String>>;

    /// Write a property. A single `set` is atomic with respect to readers.
    fn set(&self, name: &str, value: &str) -> Result<()>;
}

/// Property store backed by the `getprop` and `setprop` tools.
pub struct AndroidProperties {
    getprop: String,
    setprop: String,
}

impl AndroidProperties {
    /// Use `getprop`/`setprop` from `PATH`.
    pub fn new() -> Self {
        Self {
            getprop: "getprop".into(),
            setprop: "setprop".into(),
        }
    }
}

impl Default for AndroidProperties {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyService for AndroidProperties {
    fn get(&self, name: &str) -> Result<Option<String>> {
        let output = Command::new(&self.getprop)
            .arg(name)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|source| Error::Spawn {
                program: self.getprop.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                program: self.getprop.clone(),
                status: output.status,
            });
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!value.is_empty()).then_some(value))
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        let status = Command::new(&self.setprop)
            .arg(name)
            .arg(value)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| Error::Spawn {
                program: self.setprop.clone(),
                source,
            })?;
        if !status.success() {
            return Err(Error::CommandFailed {
                program: self.setprop.clone(),
                status,
            });
        }
        Ok(())
    }
}
