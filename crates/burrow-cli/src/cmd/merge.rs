use std::sync::atomic::AtomicBool;

use burrow_core::backup::BackupId;
use burrow_core::commands;
use burrow_core::config::BurrowConfig;

use crate::format::format_bytes;

pub(crate) fn run_merge(
    config: &BurrowConfig,
    instance: Option<&str>,
    backup_id: BackupId,
    threads: Option<usize>,
    merge_expired: bool,
    shutdown: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    let stats = commands::merge::run(
        config,
        instance,
        backup_id,
        threads,
        merge_expired,
        Some(shutdown),
    )?;

    if stats.nothing_to_merge {
        println!("Backup {backup_id} is already a FULL backup, nothing to merge");
        return Ok(());
    }
    if stats.resumed {
        println!("Resumed interrupted merge of {backup_id}");
    }
    println!(
        "Merged {} backups into {backup_id}: {} files ({} rebuilt, {} already staged), {} written",
        stats.chain_len,
        stats.files_total,
        stats.files_copied,
        stats.files_skipped,
        format_bytes(stats.bytes_written),
    );
    if stats.backups_removed > 0 || stats.backups_retained > 0 {
        println!(
            "Removed {} backups, kept {} still needed by other backups",
            stats.backups_removed, stats.backups_retained,
        );
    }
    Ok(())
}
