//! Tracepoint descriptor export.
//!
//! The sampling engine running inside the app cannot read tracefs, so the
//! prepare step writes the list of usable tracepoints to a world-readable
//! file. Each line is `<system>:<event> <id>`.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Default location of the exported tracepoint list.
pub const DEFAULT_TRACEPOINT_FILE: &str = "/data/local/tmp/tracepoint_events";

/// A kernel tracepoint the sampling engine can enable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracepoint {
    /// Event system, e.g. `sched`.
    pub system: String,
    /// Event name within the system, e.g. `sched_switch`.
    pub event: String,
    /// Kernel event id (perf `config` value).
    pub id: u64,
}

impl Tracepoint {
    /// `system:event` form used by perf tooling.
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.system, self.event)
    }
}

/// Something that can enumerate tracepoints.
pub trait TracepointSource {
    /// List all available tracepoints.
    fn tracepoints(&self) -> Result<Vec<Tracepoint>>;
}

/// Enumerates tracepoints from `<tracefs>/events/<system>/<event>/id`.
pub struct TracefsSource {
    roots: Vec<PathBuf>,
}

impl TracefsSource {
    /// Search the given tracefs mount points in order; the first with an
    /// `events` directory is used.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Standard tracefs mount points.
    pub fn default_roots() -> Vec<PathBuf> {
        vec![
            PathBuf::from("/sys/kernel/tracing"),
            PathBuf::from("/sys/kernel/debug/tracing"),
        ]
    }
}

impl TracepointSource for TracefsSource {
    /// Returns an empty list when no tracefs mount is reachable.
    fn tracepoints(&self) -> Result<Vec<Tracepoint>> {
        let Some(events_dir) = self
            .roots
            .iter()
            .map(|root| root.join("events"))
            .find(|dir| dir.is_dir())
        else {
            return Ok(Vec::new());
        };

        let mut tracepoints = Vec::new();
        for entry in WalkDir::new(&events_dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_dir() {
                continue;
            }
            let Ok(raw_id) = fs::read_to_string(entry.path().join("id")) else {
                continue;
            };
            let Ok(id) = raw_id.trim().parse::<u64>() else {
                continue;
            };
            let event = entry.file_name().to_string_lossy().into_owned();
            let system = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            tracepoints.push(Tracepoint { system, event, id });
        }
        Ok(tracepoints)
    }
}

/// Writes the tracepoint list to a fixed path.
pub struct TracepointExporter<'a> {
    source: &'a dyn TracepointSource,
    path: PathBuf,
}

impl<'a> TracepointExporter<'a> {
    /// Export tracepoints from `source` to `path`.
    pub fn new(source: &'a dyn TracepointSource, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            path: path.into(),
        }
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// (Re)write the descriptor file. Returns the number of tracepoints written.
    pub fn export(&self) -> Result<usize> {
        let mut tracepoints = self.source.tracepoints()?;
        tracepoints.sort_by_key(Tracepoint::full_name);

        let mut contents = String::new();
        for tp in &tracepoints {
            contents.push_str(&format!("{} {}\n", tp.full_name(), tp.id));
        }
        fs::write(&self.path, contents).map_err(|e| Error::file("write", &self.path, e))?;
        Ok(tracepoints.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct StaticTracepoints(pub Vec<Tracepoint>);

    impl TracepointSource for StaticTracepoints {
        fn tracepoints(&self) -> Result<Vec<Tracepoint>> {
            Ok(self.0.clone())
        }
    }

    fn tp(system: &str, event: &str, id: u64) -> Tracepoint {
        Tracepoint {
            system: system.into(),
            event: event.into(),
            id,
        }
    }

    #[test]
    fn export_writes_sorted_lines() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("tracepoint_events");
        let source = StaticTracepoints(vec![tp("sched", "sched_switch", 300), tp("irq", "irq_handler_entry", 42)]);

        let count = TracepointExporter::new(&source, &out).export().unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "irq:irq_handler_entry 42\nsched:sched_switch 300\n"
        );
    }

    #[test]
    fn export_to_unwritable_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("missing").join("tracepoint_events");
        let source = StaticTracepoints(Vec::new());
        let err = TracepointExporter::new(&source, &out).export().unwrap_err();
        assert!(matches!(err, Error::File { op: "write", .. }));
    }

    #[test]
    fn tracefs_source_reads_event_ids() {
        let root = tempfile::tempdir().unwrap();
        let events = root.path().join("events");
        fs::create_dir_all(events.join("sched/sched_switch")).unwrap();
        fs::write(events.join("sched/sched_switch/id"), "312\n").unwrap();
        fs::create_dir_all(events.join("sched/no_id")).unwrap();
        fs::write(events.join("sched/enable"), "0\n").unwrap();

        let source = TracefsSource::new(vec![root.path().join("absent"), root.path().to_path_buf()]);
        let tps = source.tracepoints().unwrap();
        assert_eq!(tps, vec![tp("sched", "sched_switch", 312)]);
    }

    #[test]
    fn tracefs_source_without_mount_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let source = TracefsSource::new(vec![root.path().join("nope")]);
        assert!(source.tracepoints().unwrap().is_empty());
    }
}
