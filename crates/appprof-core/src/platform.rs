//! Platform capability detection and session-scoped perf relaxation.

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::property::PropertyService;

/// First Android release that honours durable per-app profiling grants.
pub const DURABLE_GRANT_MIN_VERSION: u32 = 13;

/// Property that gates unprivileged perf events until the next reboot.
pub const PERF_HARDEN_PROPERTY: &str = "security.perf_harden";

/// Platform operations the permission grantor depends on.
pub trait Platform {
    /// Whether the platform supports persisted per-app profiling grants.
    fn supports_durable_grants(&self) -> bool;

    /// Allow unprivileged sampling for the rest of this boot.
    fn relax_sampling_restriction(&self) -> Result<()>;
}

/// Android implementation backed by system properties and procfs.
pub struct AndroidPlatform<'a> {
    props: &'a dyn PropertyService,
    paranoid_file: PathBuf,
    status_file: PathBuf,
    settle: Duration,
}

impl<'a> AndroidPlatform<'a> {
    /// Create a platform view using the standard procfs locations.
    pub fn new(props: &'a dyn PropertyService) -> Self {
        Self {
            props,
            paranoid_file: PathBuf::from("/proc/sys/kernel/perf_event_paranoid"),
            status_file: PathBuf::from("/proc/self/status"),
            settle: Duration::from_secs(1),
        }
    }

    /// How long to wait for `security.perf_harden` to take effect.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Override the `perf_event_paranoid` path.
    #[must_use]
    pub fn with_paranoid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.paranoid_file = path.into();
        self
    }

    /// Override the process status path used to detect root.
    #[must_use]
    pub fn with_status_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.status_file = path.into();
        self
    }

    /// Android major version, or 0 if it cannot be determined.
    pub fn android_version(&self) -> u32 {
        let codename = self.props.get("ro.build.version.codename").ok().flatten();
        let raw = match codename {
            Some(name) if name != "REL" => Some(name),
            _ => self.props.get("ro.build.version.release").ok().flatten(),
        };
        raw.as_deref().map_or(0, parse_android_version)
    }

    fn read_paranoid(&self) -> Option<i32> {
        fs::read_to_string(&self.paranoid_file)
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    fn is_root(&self) -> bool {
        let Ok(status) = fs::read_to_string(&self.status_file) else {
            return false;
        };
        status
            .lines()
            .find_map(|l| l.strip_prefix("Uid:"))
            .and_then(|ids| ids.split_whitespace().nth(1))
            .is_some_and(|euid| euid == "0")
    }

    fn perf_harden_disabled(&self) -> Result<bool> {
        Ok(self
            .props
            .get(PERF_HARDEN_PROPERTY)?
            .is_some_and(|v| v == "0"))
    }
}

impl Platform for AndroidPlatform<'_> {
    fn supports_durable_grants(&self) -> bool {
        self.android_version() >= DURABLE_GRANT_MIN_VERSION
    }

    fn relax_sampling_restriction(&self) -> Result<()> {
        if self.is_root() {
            return Ok(());
        }
        let paranoid = self.read_paranoid();
        if paranoid.is_some_and(|level| level <= 1) {
            return Ok(());
        }
        match self.props.get(PERF_HARDEN_PROPERTY)? {
            // Nothing to relax without the property.
            None => return Ok(()),
            Some(v) if v == "0" => return Ok(()),
            Some(_) => {}
        }

        if self.props.set(PERF_HARDEN_PROPERTY, "0").is_ok() {
            thread::sleep(self.settle);
            if self.read_paranoid().is_some_and(|level| level <= 1) || self.perf_harden_disabled()? {
                return Ok(());
            }
        }
        Err(Error::PerfRestricted {
            paranoid: self.read_paranoid().or(paranoid),
        })
    }
}

/// Parse an Android release string: `13`, `8.1.0`, or a letter codename from `P`.
pub fn parse_android_version(raw: &str) -> u32 {
    let digits: String = raw.chars().take_while(char::is_ascii_digit).collect();
    if !digits.is_empty() {
        return digits.parse().unwrap_or(0);
    }
    match raw.as_bytes() {
        [c @ b'P'..=b'Z'] => u32::from(c - b'P') + 9,
        _ => 0,
    }
}
