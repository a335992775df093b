//! Profiling permission grants.
//!
//! Two mutually exclusive policies exist. On platforms that support it, a
//! durable grant names one app uid and an expiration time and survives
//! reboots; the sampling engine checks the expiration itself. Elsewhere the
//! kernel sampling restriction is relaxed for the current boot only.
//!
//! A durable grant is persisted as a single record so that readers never see
//! a uid without its expiration or the reverse.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::property::PropertyService;
use crate::tracepoint::TracepointExporter;
use crate::uid::UidResolver;

/// Seconds in one day of grant validity.
pub const SECONDS_PER_DAY: u64 = 24 * 3600;

/// Default property holding the persisted grant record.
pub const GRANT_PROPERTY: &str = "persist.appprof.profile_app_grant";

/// When a durable grant stops being honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expiration {
    /// Seconds since the Unix epoch.
    At(u64),
    /// Never expires; stored as the maximum timestamp.
    Unbounded,
}

impl Expiration {
    /// `now + days * 86400`, or [`Expiration::Unbounded`] if that overflows.
    pub fn after_days(now_secs: u64, days: u64) -> Self {
        days.checked_mul(SECONDS_PER_DAY)
            .and_then(|duration| now_secs.checked_add(duration))
            .map_or(Self::Unbounded, Self::At)
    }

    /// Expiration as a timestamp; unbounded maps to `u64::MAX`.
    pub fn timestamp(self) -> u64 {
        match self {
            Self::At(t) => t,
            Self::Unbounded => u64::MAX,
        }
    }
}

impl fmt::Display for Expiration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(t) => write!(f, "{t}"),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

impl FromStr for Expiration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "unbounded" {
            return Ok(Self::Unbounded);
        }
        s.parse().map(Self::At).map_err(|_| Error::InvalidValue {
            what: "grant expiration",
            value: s.into(),
        })
    }
}

/// Permission for one app uid to profile itself until `expiration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    /// Owner uid of the app.
    pub uid: u32,
    /// When the grant lapses.
    pub expiration: Expiration,
}

impl fmt::Display for PermissionGrant {
    /// Encoded as `<uid>:<expiration>`, the property record format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.expiration)
    }
}

impl FromStr for PermissionGrant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidValue {
            what: "grant record",
            value: s.into(),
        };
        let (uid, expiration) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            uid: uid.parse().map_err(|_| invalid())?,
            expiration: expiration.parse()?,
        })
    }
}

/// Durable storage for the active grant. A later grant replaces an earlier one.
pub trait GrantStore {
    /// Atomically replace the stored grant.
    fn persist(&self, grant: &PermissionGrant) -> Result<()>;

    /// Read the stored grant, if any.
    fn load(&self) -> Result<Option<PermissionGrant>>;
}

/// Stores the grant as one persistent system property.
pub struct PropertyGrantStore<'a> {
    props: &'a dyn PropertyService,
    name: String,
}

impl<'a> PropertyGrantStore<'a> {
    /// Store the grant in property `name`.
    pub fn new(props: &'a dyn PropertyService, name: impl Into<String>) -> Self {
        Self {
            props,
            name: name.into(),
        }
    }
}

impl GrantStore for PropertyGrantStore<'_> {
    fn persist(&self, grant: &PermissionGrant) -> Result<()> {
        self.props.set(&self.name, &grant.to_string())
    }

    fn load(&self) -> Result<Option<PermissionGrant>> {
        self.props
            .get(&self.name)?
            .map(|raw| raw.parse())
            .transpose()
    }
}

/// Stores the grant as a JSON file, replaced via write-then-rename.
pub struct FileGrantStore {
    path: PathBuf,
}

impl FileGrantStore {
    /// Store the grant at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl GrantStore for FileGrantStore {
    fn persist(&self, grant: &PermissionGrant) -> Result<()> {
        let json = serde_json::to_vec_pretty(grant).map_err(|e| Error::Io(e.into()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| Error::file("write", &tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| Error::file("rename into", &self.path, e))
    }

    fn load(&self) -> Result<Option<PermissionGrant>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::file("read", &self.path, e)),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|_| Error::InvalidValue {
                what: "grant file",
                value: self.path.display().to_string(),
            })
    }
}

/// The policy applied by one prepare attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantPolicy {
    /// A durable grant was persisted.
    Durable(PermissionGrant),
    /// Sampling was relaxed for the current boot.
    SessionRelaxed,
}

/// What a successful prepare did.
#[derive(Debug)]
pub struct PrepareOutcome {
    /// Policy applied.
    pub policy: GrantPolicy,
    /// Number of tracepoints exported.
    pub tracepoints: usize,
}

/// Applies exactly one permission policy, then exports tracepoints.
pub struct PermissionGrantor<'a> {
    platform: &'a dyn Platform,
    resolver: UidResolver<'a>,
    store: &'a dyn GrantStore,
    exporter: &'a TracepointExporter<'a>,
}

impl<'a> PermissionGrantor<'a> {
    /// Assemble a grantor from its collaborators.
    pub fn new(
        platform: &'a dyn Platform,
        resolver: UidResolver<'a>,
        store: &'a dyn GrantStore,
        exporter: &'a TracepointExporter<'a>,
    ) -> Self {
        Self {
            platform,
            resolver,
            store,
            exporter,
        }
    }

    /// Grant `app` profiling permission for `days`, or relax sampling for the
    /// boot when a durable grant is not possible.
    ///
    /// The tracepoint list is rewritten in both cases; failing to write it
    /// fails the whole operation.
    pub fn prepare(&self, app: Option<&str>, days: Option<u64>, now_secs: u64) -> Result<PrepareOutcome> {
        let app = app.filter(|a| !a.is_empty());
        let days = days.filter(|d| *d != 0);

        let policy = match (app, days) {
            (Some(app), Some(days)) if self.platform.supports_durable_grants() => {
                let uid = self.resolver.resolve(app)?;
                let grant = PermissionGrant {
                    uid,
                    expiration: Expiration::after_days(now_secs, days),
                };
                self.store.persist(&grant)?;
                GrantPolicy::Durable(grant)
            }
            _ => {
                self.platform.relax_sampling_restriction()?;
                GrantPolicy::SessionRelaxed
            }
        };

        let tracepoints = self.exporter.export()?;
        Ok(PrepareOutcome {
            policy,
            tracepoints,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::property::memory::MemoryProperties;
    use crate::tracepoint::Tracepoint;
    use crate::tracepoint::tests::StaticTracepoints;
    use crate::uid::tests::FixedListing;

    struct FakePlatform {
        durable: bool,
        relax_ok: bool,
        relaxed: Cell<u32>,
    }

    impl FakePlatform {
        fn new(durable: bool) -> Self {
            Self {
                durable,
                relax_ok: true,
                relaxed: Cell::new(0),
            }
        }
    }

    impl Platform for FakePlatform {
        fn supports_durable_grants(&self) -> bool {
            self.durable
        }

        fn relax_sampling_restriction(&self) -> Result<()> {
            self.relaxed.set(self.relaxed.get() + 1);
            if self.relax_ok {
                Ok(())
            } else {
                Err(Error::PerfRestricted { paranoid: Some(3) })
            }
        }
    }

    const LISTING: FixedListing = FixedListing("package:com.foo uid:10001\npackage:com.bar uid:10002\n");
    const NOW: u64 = 1_700_000_000;

    struct Harness {
        _dir: tempfile::TempDir,
        trace_path: PathBuf,
        props: MemoryProperties,
        tracepoints: StaticTracepoints,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let trace_path = dir.path().join("tracepoint_events");
            Self {
                _dir: dir,
                trace_path,
                props: MemoryProperties::default(),
                tracepoints: StaticTracepoints(vec![Tracepoint {
                    system: "sched".into(),
                    event: "sched_switch".into(),
                    id: 7,
                }]),
            }
        }

        fn prepare(&self, platform: &FakePlatform, app: Option<&str>, days: Option<u64>) -> Result<PrepareOutcome> {
            let store = PropertyGrantStore::new(&self.props, GRANT_PROPERTY);
            let exporter = TracepointExporter::new(&self.tracepoints, &self.trace_path);
            PermissionGrantor::new(platform, UidResolver::new(&LISTING), &store, &exporter).prepare(app, days, NOW)
        }
    }

    #[test]
    fn expiration_adds_days() {
        assert_eq!(Expiration::after_days(NOW, 3), Expiration::At(NOW + 3 * 86400));
        assert_eq!(Expiration::after_days(NOW, 3).timestamp(), NOW + 259_200);
    }

    #[test]
    fn expiration_overflow_is_unbounded() {
        // Multiplication overflow.
        assert_eq!(Expiration::after_days(NOW, u64::MAX / 1000), Expiration::Unbounded);
        // Addition overflow.
        let days = (u64::MAX - 10) / SECONDS_PER_DAY;
        assert_eq!(Expiration::after_days(u64::MAX - 10, days), Expiration::Unbounded);
        assert_eq!(Expiration::Unbounded.timestamp(), u64::MAX);
    }

    #[test]
    fn grant_record_round_trips_through_property() {
        let grant = PermissionGrant {
            uid: 10002,
            expiration: Expiration::Unbounded,
        };
        assert_eq!(grant.to_string(), "10002:unbounded");
        assert_eq!("10002:unbounded".parse::<PermissionGrant>().unwrap(), grant);
        assert!("10002".parse::<PermissionGrant>().is_err());
        assert!("x:5".parse::<PermissionGrant>().is_err());
    }

    #[test]
    fn durable_grant_persists_single_record() {
        let h = Harness::new();
        let platform = FakePlatform::new(true);
        let outcome = h.prepare(&platform, Some("com.bar"), Some(2)).unwrap();

        let expected = PermissionGrant {
            uid: 10002,
            expiration: Expiration::At(NOW + 2 * SECONDS_PER_DAY),
        };
        assert_eq!(outcome.policy, GrantPolicy::Durable(expected));
        assert_eq!(outcome.tracepoints, 1);
        assert_eq!(platform.relaxed.get(), 0);
        assert_eq!(
            h.props.writes.borrow().as_slice(),
            &[(GRANT_PROPERTY.to_string(), format!("10002:{}", NOW + 172_800))]
        );
        assert_eq!(fs::read_to_string(&h.trace_path).unwrap(), "sched:sched_switch 7\n");
    }

    #[test]
    fn missing_days_relaxes_for_session() {
        let h = Harness::new();
        let platform = FakePlatform::new(true);
        let outcome = h.prepare(&platform, Some("com.bar"), Some(0)).unwrap();
        assert_eq!(outcome.policy, GrantPolicy::SessionRelaxed);
        assert_eq!(platform.relaxed.get(), 1);
        assert!(h.props.writes.borrow().is_empty());
        assert!(h.trace_path.exists());
    }

    #[test]
    fn old_platform_relaxes_even_with_days() {
        let h = Harness::new();
        let platform = FakePlatform::new(false);
        let outcome = h.prepare(&platform, Some("com.bar"), Some(5)).unwrap();
        assert_eq!(outcome.policy, GrantPolicy::SessionRelaxed);
        assert!(h.props.writes.borrow().is_empty());
    }

    #[test]
    fn unknown_package_aborts_without_exporting() {
        let h = Harness::new();
        let platform = FakePlatform::new(true);
        let err = h.prepare(&platform, Some("com.baz"), Some(1)).unwrap_err();
        assert!(matches!(err, Error::PackageNotFound(_)));
        assert!(h.props.writes.borrow().is_empty());
        assert!(!h.trace_path.exists());
    }

    #[test]
    fn persist_failure_fails_grant() {
        let mut h = Harness::new();
        h.props.read_only.push(GRANT_PROPERTY.into());
        let platform = FakePlatform::new(true);
        assert!(h.prepare(&platform, Some("com.foo"), Some(1)).is_err());
        assert_eq!(platform.relaxed.get(), 0);
    }

    #[test]
    fn relax_failure_fails_prepare() {
        let h = Harness::new();
        let mut platform = FakePlatform::new(false);
        platform.relax_ok = false;
        let err = h.prepare(&platform, None, None).unwrap_err();
        assert!(matches!(err, Error::PerfRestricted { .. }));
        assert!(!h.trace_path.exists());
    }

    #[test]
    fn file_store_replaces_previous_grant() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileGrantStore::new(dir.path().join("grant.json"));
        assert_eq!(store.load().unwrap(), None);

        let first = PermissionGrant {
            uid: 10001,
            expiration: Expiration::At(5),
        };
        let second = PermissionGrant {
            uid: 10001,
            expiration: Expiration::Unbounded,
        };
        store.persist(&first).unwrap();
        store.persist(&second).unwrap();
        assert_eq!(store.load().unwrap(), Some(second));
        assert!(!dir.path().join("grant.tmp").exists());
    }
}
