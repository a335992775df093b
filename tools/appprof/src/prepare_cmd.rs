//! `appprof api-prepare`: grant an app permission to profile itself.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use appprof_core::grant::{FileGrantStore, GrantPolicy, GrantStore, PermissionGrantor, PropertyGrantStore};
use appprof_core::platform::AndroidPlatform;
use appprof_core::property::AndroidProperties;
use appprof_core::tracepoint::{TracefsSource, TracepointExporter};
use appprof_core::uid::{PmPackageLister, UidResolver};

use crate::cli::PrepareArgs;
use crate::config::{GrantStoreKind, ToolConfig};
use crate::verbose::{Timer, dprintln, vprintln};

/// Apply the permission policy and export tracepoints.
pub fn cmd_prepare(args: &PrepareArgs, config: &ToolConfig) -> Result<()> {
    let _t = Timer::start("api-prepare");
    let props = AndroidProperties::new();
    let platform = AndroidPlatform::new(&props).with_settle(Duration::from_millis(config.relax_settle_ms));
    let lister = PmPackageLister::new();

    let property_store;
    let file_store;
    let store: &dyn GrantStore = match config.grant_store {
        GrantStoreKind::Property => {
            property_store = PropertyGrantStore::new(&props, config.grant_property.as_str());
            &property_store
        }
        GrantStoreKind::File => {
            file_store = FileGrantStore::new(&config.grant_file);
            &file_store
        }
    };

    let source = TracefsSource::new(config.tracefs_dirs.clone());
    let exporter = TracepointExporter::new(&source, &config.tracepoint_file);
    let grantor = PermissionGrantor::new(&platform, UidResolver::new(&lister), store, &exporter);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the Unix epoch")?
        .as_secs();
    vprintln!(
        "  app: {}, days: {}",
        args.app.as_deref().unwrap_or("-"),
        args.days.unwrap_or(0)
    );

    let outcome = grantor
        .prepare(args.app.as_deref(), args.days, now)
        .context("api-prepare failed")?;

    match outcome.policy {
        GrantPolicy::Durable(grant) => {
            dprintln!("Granted uid {} profiling until {}", grant.uid, grant.expiration);
        }
        GrantPolicy::SessionRelaxed => {
            dprintln!("Profiling enabled until reboot");
        }
    }
    vprintln!(
        "  wrote {} tracepoints to {}",
        outcome.tracepoints,
        exporter.path().display()
    );
    Ok(())
}
