use crate::backup::{BackupId, BackupMeta, BackupStatus};
use crate::config::BurrowConfig;
use crate::error::Result;

use super::util::open_catalog;

/// Change a backup's status by hand, subject to the usual transition rules.
pub fn run(
    config: &BurrowConfig,
    instance: Option<&str>,
    backup_id: BackupId,
    status: BackupStatus,
) -> Result<BackupMeta> {
    let catalog = open_catalog(config, instance)?;
    let meta = catalog.set_status(backup_id, status)?;
    tracing::info!(backup = %backup_id, status = %status, "status set");
    Ok(meta)
}
