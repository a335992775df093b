//! Package name to owner uid resolution.
//!
//! Parses the output of `pm list packages -U`, which prints one
//! `package:<name> uid:<uid>` line per installed package.

use std::process::{Command, Stdio};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

/// An application, identified by package name and (once resolved) owner uid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationIdentity {
    /// Package name, e.g. `com.example.app`.
    pub package_name: String,
    /// Numeric owner uid, if resolved.
    pub uid: Option<u32>,
}

impl ApplicationIdentity {
    /// An identity whose uid has not been resolved.
    pub fn unresolved(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            uid: None,
        }
    }
}

/// Source of the installed-package listing.
pub trait PackageLister {
    /// Return the raw listing text.
    fn list_packages(&self) -> Result<String>;
}

/// Lists packages by running `pm list packages -U`.
pub struct PmPackageLister {
    program: String,
}

impl PmPackageLister {
    /// Use `pm` from `PATH`.
    pub fn new() -> Self {
        Self { program: "pm".into() }
    }
}

impl Default for PmPackageLister {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageLister for PmPackageLister {
    fn list_packages(&self) -> Result<String> {
        let spawn_err = |source| Error::Spawn {
            program: format!("{} list packages -U", self.program),
            source,
        };
        let output = Command::new(&self.program)
            .args(["list", "packages", "-U"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(spawn_err)?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                program: format!("{} list packages -U", self.program),
                status: output.status,
            });
        }
        String::from_utf8(output.stdout).map_err(|e| {
            spawn_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

fn package_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"package:([\w.]+)\s+uid:(\d+)").expect("valid regex"))
}

/// Find the uid of `package` in a `pm list packages -U` listing.
///
/// Names are compared exactly. Lines whose uid does not fit a `u32` are
/// skipped.
pub fn find_uid(listing: &str, package: &str) -> Option<u32> {
    package_line()
        .captures_iter(listing)
        .filter_map(|caps| {
            let uid = caps[2].parse::<u32>().ok()?;
            Some((caps.get(1)?.as_str(), uid))
        })
        .find(|(name, _)| *name == package)
        .map(|(_, uid)| uid)
}

/// Resolves package names to owner uids. Nothing is cached between calls.
pub struct UidResolver<'a> {
    lister: &'a dyn PackageLister,
}

impl<'a> UidResolver<'a> {
    /// Create a resolver over the given listing source.
    pub fn new(lister: &'a dyn PackageLister) -> Self {
        Self { lister }
    }

    /// Resolve `package` to its owner uid.
    pub fn resolve(&self, package: &str) -> Result<u32> {
        let listing = self.lister.list_packages()?;
        find_uid(&listing, package).ok_or_else(|| Error::PackageNotFound(package.to_string()))
    }

    /// Fill in the uid of `identity`, replacing any earlier value.
    pub fn resolve_identity(&self, identity: &mut ApplicationIdentity) -> Result<u32> {
        let uid = self.resolve(&identity.package_name)?;
        identity.uid = Some(uid);
        Ok(uid)
    }
}
