use std::collections::HashSet;

use tracing::info;

use crate::backup::{BackupId, BackupMeta, BackupStatus, DEFAULT_CONTENT_DIR, MERGED_CONTENT_DIR};
use crate::catalog::Catalog;
use crate::error::Result;
use crate::failpoint::{self, FailPoints, MERGE_RECLAIM};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    pub removed: usize,
    pub retained: usize,
}

/// Backups absorbed into `target` that other backups still depend on.
///
/// A member is kept when some live child either lies outside the merge or is
/// itself kept.
fn retained_members(
    backups: &[BackupMeta],
    absorbed: &[&BackupMeta],
    target: BackupId,
) -> HashSet<BackupId> {
    let absorbed_ids: HashSet<BackupId> = absorbed.iter().map(|m| m.id).collect();
    let mut retained = HashSet::new();
    loop {
        let mut changed = false;
        for member in absorbed {
            if member.status != BackupStatus::Merging || retained.contains(&member.id) {
                continue;
            }
            let has_dependent = backups.iter().any(|child| {
                child.parent_id == Some(member.id)
                    && child.id != target
                    && !child.status.is_leaving()
                    && (!absorbed_ids.contains(&child.id) || retained.contains(&child.id))
            });
            if has_dependent {
                retained.insert(member.id);
                changed = true;
            }
        }
        if !changed {
            return retained;
        }
    }
}

/// Drop the storage of absorbed members nothing depends on any more, return
/// the rest to OK, and remove the target's pre-merge content.
pub(super) fn run(
    catalog: &Catalog,
    target: BackupId,
    failpoints: Option<&FailPoints>,
) -> Result<ReclaimStats> {
    let backups = catalog.list()?;
    let mut absorbed: Vec<&BackupMeta> = backups
        .iter()
        .filter(|b| b.id != target && b.merge_dest_id == Some(target))
        .filter(|b| matches!(b.status, BackupStatus::Merging | BackupStatus::Merged))
        .collect();
    absorbed.sort_by_key(|b| std::cmp::Reverse(b.id));
    let retained = retained_members(&backups, &absorbed, target);

    let mut stats = ReclaimStats::default();
    for member in absorbed {
        if retained.contains(&member.id) {
            catalog.update(member.id, |m| {
                m.status = BackupStatus::Ok;
                m.merge_dest_id = None;
            })?;
            info!(backup = %member.id, merged_into = %target, "kept: other backups depend on it");
            stats.retained += 1;
            continue;
        }
        if member.status == BackupStatus::Merging {
            catalog.set_status(member.id, BackupStatus::Merged)?;
            failpoint::hit(failpoints, MERGE_RECLAIM)?;
        }
        catalog.remove_backup(member.id)?;
        info!(backup = %member.id, merged_into = %target, "removed");
        stats.removed += 1;
    }

    if catalog.get(target)?.content_dir == MERGED_CONTENT_DIR {
        catalog.remove_content(target, DEFAULT_CONTENT_DIR)?;
    }
    Ok(stats)
}
