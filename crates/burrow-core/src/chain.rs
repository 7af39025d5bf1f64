use std::collections::HashSet;

use crate::backup::{BackupId, BackupMeta};
use crate::catalog::Catalog;
use crate::error::{BurrowError, Result};

/// Chain of `target`, nearest FULL first and `target` last.
pub fn resolve(catalog: &Catalog, target: BackupId) -> Result<Vec<BackupMeta>> {
    resolve_with(target, |id| catalog.try_get(id))
}

/// Walk parent links from `target` until a FULL backup is reached. Every
/// visited backup must be OK or MERGING; only parent references are
/// followed, never ids or timestamps.
fn resolve_with<F>(target: BackupId, mut lookup: F) -> Result<Vec<BackupMeta>>
where
    F: FnMut(BackupId) -> Result<Option<BackupMeta>>,
{
    let broken = |reason: String| BurrowError::ChainBroken {
        backup_id: target,
        reason,
    };

    let head = lookup(target)?.ok_or(BurrowError::BackupNotFound(target))?;
    if !head.status.is_resolvable() {
        return Err(BurrowError::InvalidStatus {
            backup_id: target,
            status: head.status,
            action: "resolving its chain",
        });
    }

    let mut visited = HashSet::from([target]);
    let mut chain = vec![head];
    loop {
        let current = &chain[chain.len() - 1];
        if current.is_full() {
            break;
        }
        let Some(parent_id) = current.parent_id else {
            return Err(broken(format!(
                "{} backup {} has no parent",
                current.mode, current.id
            )));
        };
        if !visited.insert(parent_id) {
            return Err(broken(format!("parent links form a cycle at {parent_id}")));
        }
        let parent = lookup(parent_id)?
            .ok_or_else(|| broken(format!("parent backup {parent_id} is missing")))?;
        if !parent.status.is_resolvable() {
            return Err(broken(format!(
                "parent backup {parent_id} has status {}",
                parent.status
            )));
        }
        chain.push(parent);
    }

    chain.reverse();
    Ok(chain)
}
