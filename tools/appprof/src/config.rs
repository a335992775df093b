//! Tool configuration.
//!
//! Every setting has a built-in default matching the on-device layout. An
//! optional TOML file overrides individual keys:
//!
//! ```toml
//! data_dir = "appprof_data"
//! grant_store = "file"
//! grant_file = "/data/local/tmp/appprof_grant.json"
//! launcher = ["run-as"]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use appprof_core::collector::{DEFAULT_DATA_DIR, TEMP_FILE_PREFIX};
use appprof_core::grant::GRANT_PROPERTY;
use appprof_core::tracepoint::{DEFAULT_TRACEPOINT_FILE, TracefsSource};
use serde::Deserialize;

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV: &str = "APPPROF_CONFIG";

/// The config file in effect: `explicit`, else `$APPPROF_CONFIG`.
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

/// Where durable grants are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStoreKind {
    /// A single persistent system property.
    Property,
    /// A JSON file replaced atomically.
    File,
}

/// Resolved tool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    /// Recording data directory inside the app sandbox.
    pub data_dir: PathBuf,
    /// Prefix of files still being written.
    pub temp_prefix: String,
    /// Exported tracepoint list.
    pub tracepoint_file: PathBuf,
    /// Candidate tracefs mount points.
    pub tracefs_dirs: Vec<PathBuf>,
    /// Default archive destination for `api-collect`.
    pub default_output: PathBuf,
    /// Grant persistence backend.
    pub grant_store: GrantStoreKind,
    /// Grant file for the `file` backend.
    pub grant_file: PathBuf,
    /// Property name for the `property` backend.
    pub grant_property: String,
    /// Argv prefix used to enter an app sandbox.
    pub launcher: Vec<String>,
    /// Milliseconds to wait after setting `security.perf_harden`.
    pub relax_settle_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            temp_prefix: TEMP_FILE_PREFIX.into(),
            tracepoint_file: PathBuf::from(DEFAULT_TRACEPOINT_FILE),
            tracefs_dirs: TracefsSource::default_roots(),
            default_output: PathBuf::from("appprof_data.zip"),
            grant_store: GrantStoreKind::Property,
            grant_file: PathBuf::from("/data/local/tmp/appprof_grant.json"),
            grant_property: GRANT_PROPERTY.into(),
            launcher: vec!["run-as".into()],
            relax_settle_ms: 1000,
        }
    }
}

impl ToolConfig {
    /// Load from `explicit`, else from `$APPPROF_CONFIG`, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match config_path(explicit) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
