use std::collections::HashMap;

use tracing::info;

use crate::backup::{BackupId, BackupMeta, BackupStatus};
use crate::catalog::Catalog;
use crate::config::BurrowConfig;
use crate::error::{BurrowError, Result};

use super::util::open_catalog;

pub struct DeleteStats {
    /// Removed backups, descendants before their parents.
    pub deleted: Vec<BackupId>,
}

pub fn run(config: &BurrowConfig, instance: Option<&str>, backup_id: BackupId) -> Result<DeleteStats> {
    let catalog = open_catalog(config, instance)?;
    delete_with_descendants(&catalog, backup_id)
}

/// Delete a backup and everything built on top of it. Backups taking part in
/// a merge are refused.
pub fn delete_with_descendants(catalog: &Catalog, backup_id: BackupId) -> Result<DeleteStats> {
    let backups = catalog.list()?;
    if !backups.iter().any(|b| b.id == backup_id) {
        return Err(BurrowError::BackupNotFound(backup_id));
    }

    let mut children: HashMap<BackupId, Vec<&BackupMeta>> = HashMap::new();
    for b in &backups {
        if let Some(parent) = b.parent_id {
            children.entry(parent).or_default().push(b);
        }
    }

    // Depth-first walk; reversing puts descendants before their parents.
    let mut order = Vec::new();
    let mut stack = vec![backup_id];
    while let Some(id) = stack.pop() {
        if order.contains(&id) {
            continue;
        }
        order.push(id);
        if let Some(kids) = children.get(&id) {
            stack.extend(kids.iter().map(|k| k.id));
        }
    }
    order.reverse();

    for id in &order {
        if let Some(meta) = backups.iter().find(|b| b.id == *id) {
            if meta.status == BackupStatus::Merging {
                return Err(BurrowError::InvalidStatus {
                    backup_id: *id,
                    status: meta.status,
                    action: "delete",
                });
            }
        }
    }

    for id in &order {
        catalog.set_status(*id, BackupStatus::Deleting)?;
        catalog.remove_backup(*id)?;
        info!(backup = %id, "backup deleted");
    }
    Ok(DeleteStats { deleted: order })
}
