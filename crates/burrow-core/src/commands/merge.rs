use std::sync::atomic::AtomicBool;

use crate::backup::BackupId;
use crate::config::BurrowConfig;
use crate::error::Result;
use crate::merge::{self, MergeOptions, MergeStats};
use crate::retention::RetentionPolicy;

use super::util::open_catalog;

/// Merge a backup with its chain using the configured defaults.
/// `threads` overrides `merge.threads`.
pub fn run(
    config: &BurrowConfig,
    instance: Option<&str>,
    backup_id: BackupId,
    threads: Option<usize>,
    merge_expired: bool,
    shutdown: Option<&AtomicBool>,
) -> Result<MergeStats> {
    let catalog = open_catalog(config, instance)?;
    let opts = MergeOptions {
        threads: threads.unwrap_or(config.merge.threads),
        merge_expired,
        retention: RetentionPolicy::from_config(&config.retention)?,
        shutdown,
        ..MergeOptions::default()
    };
    merge::run(&catalog, backup_id, &opts)
}
