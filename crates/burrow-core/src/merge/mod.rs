//! Chain merge and crash recovery.
//!
//! A merge folds a FULL backup and its incrementals into a single FULL
//! backup that takes over the target's identity. The protocol:
//!
//! 1. mark the target, then each ancestor newest to oldest, MERGING with
//!    `merge_dest_id` naming the target;
//! 2. rebuild every file of the target into `<target>/merged/`;
//! 3. stage and rename `merged.filelist`, then rewrite the target's control
//!    record in one atomic write as an OK FULL backup whose content is
//!    `merged`;
//! 4. reclaim the absorbed ancestors.
//!
//! Every step is safe to repeat, so [`run`] on a target left MERGING by a
//! crash picks up wherever the previous attempt stopped.

mod commit;
mod executor;
mod reclaim;

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::backup::{BackupId, BackupMeta, BackupStatus};
use crate::catalog::Catalog;
use crate::chain;
use crate::content::ChainView;
use crate::error::{BurrowError, Result};
use crate::failpoint::{self, FailPoints};
use crate::retention::RetentionPolicy;

pub use self::reclaim::ReclaimStats;

pub struct MergeOptions<'a> {
    /// Worker threads; 1 runs inline, 0 uses every core.
    pub threads: usize,
    /// Allow merging a backup outside the retention window.
    pub merge_expired: bool,
    pub retention: Option<RetentionPolicy>,
    /// Evaluation time for retention; defaults to now.
    pub now: Option<DateTime<Utc>>,
    pub shutdown: Option<&'a AtomicBool>,
    pub failpoints: Option<&'a FailPoints>,
}

impl Default for MergeOptions<'_> {
    fn default() -> Self {
        Self {
            threads: 1,
            merge_expired: false,
            retention: None,
            now: None,
            shutdown: None,
            failpoints: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub backup_id: Option<BackupId>,
    /// Backups folded together, target included.
    pub chain_len: usize,
    pub files_total: usize,
    pub files_copied: usize,
    /// Files already staged by an interrupted attempt.
    pub files_skipped: usize,
    pub bytes_written: u64,
    pub backups_removed: usize,
    pub backups_retained: usize,
    /// The call continued an interrupted merge.
    pub resumed: bool,
    /// The target was already a FULL backup.
    pub nothing_to_merge: bool,
}

/// Merge `target` with its chain, or finish an interrupted merge of it.
pub fn run(catalog: &Catalog, target: BackupId, opts: &MergeOptions<'_>) -> Result<MergeStats> {
    let mut stats = MergeStats {
        backup_id: Some(target),
        ..MergeStats::default()
    };

    finish_pending_reclaims(catalog, opts)?;

    let meta = catalog.get(target)?;
    match meta.status {
        BackupStatus::Ok if meta.is_full() => {
            info!(backup = %target, "backup is already FULL, nothing to merge");
            stats.nothing_to_merge = true;
            stats.chain_len = 1;
            Ok(stats)
        }
        BackupStatus::Ok => {
            let chain = chain::resolve(catalog, target)?;
            check_conflicts(target, &chain)?;
            check_retention(&meta, opts)?;
            info!(backup = %target, chain_len = chain.len(), "merge started");
            start(catalog, &chain, target, opts)?;
            merge_chain(catalog, target, opts, stats)
        }
        BackupStatus::Merging => {
            let dest = meta.merge_dest_id.unwrap_or(target);
            if dest != target {
                return Err(BurrowError::ConcurrentMergeConflict {
                    backup_id: target,
                    dest,
                });
            }
            stats.resumed = true;
            let chain = chain::resolve(catalog, target)?;
            check_conflicts(target, &chain)?;
            info!(backup = %target, chain_len = chain.len(), "resuming interrupted merge");
            // Ancestors not yet marked when the previous attempt stopped.
            start(catalog, &chain, target, opts)?;
            merge_chain(catalog, target, opts, stats)
        }
        status => Err(BurrowError::InvalidStatus {
            backup_id: target,
            status,
            action: "merge",
        }),
    }
}

fn check_conflicts(target: BackupId, chain: &[BackupMeta]) -> Result<()> {
    for member in chain {
        if member.status != BackupStatus::Merging {
            continue;
        }
        match member.merge_dest_id {
            Some(dest) if dest == target => {}
            Some(dest) => {
                return Err(BurrowError::ConcurrentMergeConflict {
                    backup_id: member.id,
                    dest,
                })
            }
            None => {
                return Err(BurrowError::InvalidStatus {
                    backup_id: member.id,
                    status: member.status,
                    action: "merge",
                })
            }
        }
    }
    Ok(())
}

fn check_retention(meta: &BackupMeta, opts: &MergeOptions<'_>) -> Result<()> {
    let Some(policy) = opts.retention else {
        return Ok(());
    };
    let now = opts.now.unwrap_or_else(Utc::now);
    if policy.is_expired(meta, now) {
        if !opts.merge_expired {
            return Err(BurrowError::Expired(meta.id));
        }
        warn!(backup = %meta.id, "merging backup outside the retention window");
    }
    Ok(())
}

/// Mark the target and then its ancestors, newest first, as participants.
fn start(
    catalog: &Catalog,
    chain: &[BackupMeta],
    target: BackupId,
    opts: &MergeOptions<'_>,
) -> Result<()> {
    for member in chain.iter().rev() {
        if member.status == BackupStatus::Merging {
            continue;
        }
        catalog.update(member.id, |m| {
            m.status = BackupStatus::Merging;
            m.merge_dest_id = Some(target);
        })?;
    }
    failpoint::hit(opts.failpoints, failpoint::MERGE_START_STATUS)
}

fn merge_chain(
    catalog: &Catalog,
    target: BackupId,
    opts: &MergeOptions<'_>,
    mut stats: MergeStats,
) -> Result<MergeStats> {
    // Re-read so the view carries the MERGING records.
    let chain = chain::resolve(catalog, target)?;
    stats.chain_len = chain.len();
    let view = ChainView::load(catalog, chain)?;

    let work = executor::execute(catalog, &view, opts)?;
    stats.files_total = work.files.len();
    stats.files_copied = work.copied;
    stats.files_skipped = work.skipped;
    stats.bytes_written = work.bytes_written;

    commit::publish(catalog, &view.target().meta, &work.files, opts.failpoints)?;
    info!(
        backup = %target,
        files = stats.files_total,
        copied = stats.files_copied,
        skipped = stats.files_skipped,
        "merge committed"
    );

    let reclaimed = reclaim::run(catalog, target, opts.failpoints)?;
    stats.backups_removed = reclaimed.removed;
    stats.backups_retained = reclaimed.retained;
    Ok(stats)
}

/// Reclaim ancestors of merges that committed but did not finish cleanup.
fn finish_pending_reclaims(catalog: &Catalog, opts: &MergeOptions<'_>) -> Result<()> {
    let backups = catalog.list()?;
    let by_id: BTreeMap<BackupId, &BackupMeta> = backups.iter().map(|b| (b.id, b)).collect();
    let mut dests: Vec<BackupId> = backups
        .iter()
        .filter(|b| matches!(b.status, BackupStatus::Merging | BackupStatus::Merged))
        .filter_map(|b| b.merge_dest_id.filter(|d| *d != b.id))
        .collect();
    dests.sort();
    dests.dedup();

    for dest in dests {
        let committed = by_id
            .get(&dest)
            .is_some_and(|d| d.status == BackupStatus::Ok && d.merge_published());
        if committed {
            info!(backup = %dest, "finishing cleanup of an earlier merge");
            reclaim::run(catalog, dest, opts.failpoints)?;
        }
    }
    Ok(())
}
