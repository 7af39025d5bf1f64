use chrono::Utc;
use serde::Serialize;

use crate::backup::{BackupId, BackupMeta};
use crate::catalog::Catalog;
use crate::config::BurrowConfig;
use crate::error::Result;
use crate::retention::RetentionPolicy;

use super::util::open_catalog;

/// One row of `show`.
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    #[serde(flatten)]
    pub meta: BackupMeta,
    pub file_count: Option<usize>,
    pub expired: bool,
}

/// Backups of the instance oldest first, or just `backup_id`.
pub fn run(
    config: &BurrowConfig,
    instance: Option<&str>,
    backup_id: Option<BackupId>,
) -> Result<Vec<BackupInfo>> {
    let catalog = open_catalog(config, instance)?;
    let policy = RetentionPolicy::from_config(&config.retention)?;
    describe(&catalog, backup_id, policy)
}

pub fn describe(
    catalog: &Catalog,
    backup_id: Option<BackupId>,
    policy: Option<RetentionPolicy>,
) -> Result<Vec<BackupInfo>> {
    let backups = match backup_id {
        Some(id) => vec![catalog.get(id)?],
        None => catalog.list()?,
    };
    let now = Utc::now();
    Ok(backups
        .into_iter()
        .map(|meta| {
            // A missing file list is shown, not fatal.
            let file_count = catalog.read_file_list(&meta).ok().map(|f| f.len());
            let expired = policy.is_some_and(|p| p.is_expired(&meta, now));
            BackupInfo {
                meta,
                file_count,
                expired,
            }
        })
        .collect())
}
