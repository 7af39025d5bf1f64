use tracing::{info, warn};

use crate::backup::{BackupId, BackupStatus};
use crate::catalog::Catalog;
use crate::config::BurrowConfig;
use crate::content;
use crate::error::{BurrowError, Result};

use super::util::open_catalog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateReport {
    pub backup_id: BackupId,
    pub files_checked: usize,
    /// Why the backup was marked CORRUPT.
    pub problem: Option<String>,
}

impl ValidateReport {
    pub fn is_ok(&self) -> bool {
        self.problem.is_none()
    }
}

pub fn run(
    config: &BurrowConfig,
    instance: Option<&str>,
    backup_id: BackupId,
) -> Result<ValidateReport> {
    let catalog = open_catalog(config, instance)?;
    validate_backup(&catalog, backup_id)
}

/// Rebuild every file of an OK backup through its chain. Damaged content
/// marks the backup CORRUPT; chain problems are returned as errors.
pub fn validate_backup(catalog: &Catalog, backup_id: BackupId) -> Result<ValidateReport> {
    let meta = catalog.get(backup_id)?;
    if meta.status != BackupStatus::Ok {
        return Err(BurrowError::InvalidStatus {
            backup_id,
            status: meta.status,
            action: "validate",
        });
    }

    match content::verify_backup(catalog, backup_id) {
        Ok(files_checked) => {
            info!(backup = %backup_id, files = files_checked, "backup is valid");
            Ok(ValidateReport {
                backup_id,
                files_checked,
                problem: None,
            })
        }
        Err(
            e @ (BurrowError::InvalidPage { .. }
            | BurrowError::MissingFile { .. }
            | BurrowError::Decompression(_)
            | BurrowError::UnknownCompressionTag(_)),
        ) => {
            warn!(backup = %backup_id, error = %e, "backup is corrupt");
            catalog.set_status(backup_id, BackupStatus::Corrupt)?;
            Ok(ValidateReport {
                backup_id,
                files_checked: 0,
                problem: Some(e.to_string()),
            })
        }
        Err(e) => Err(e),
    }
}
