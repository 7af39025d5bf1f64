use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};

use crate::backup::{
    BackupId, BackupMode, BackupStatus, WalMode, DEFAULT_CONTENT_DIR, MERGED_CONTENT_DIR,
};
use crate::catalog::{BackupSpec, BackupWriter, ChangeMap};
use crate::chain;
use crate::compress::{compress, Compression, TAG_ZSTD};
use crate::content;
use crate::error::BurrowError;
use crate::merge::{self, MergeOptions};
use crate::page::{split_pages, PageFile};
use crate::retention::RetentionPolicy;

use super::helpers::{ids, init_catalog, SimNode};

#[test]
fn merge_page_into_full() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    let table = node.create_table("t", 10);

    let full = node.full(&catalog);
    node.insert_rows("t", 10);
    let page = node.page(&catalog, full.id);

    let stats = merge::run(&catalog, page.id, &MergeOptions::default()).unwrap();
    assert_eq!(stats.chain_len, 2);
    assert_eq!(stats.backups_removed, 1);
    assert!(!stats.resumed);

    let backups = catalog.list().unwrap();
    assert_eq!(ids(&backups), vec![page.id]);
    let merged = &backups[0];
    assert_eq!(merged.mode, BackupMode::Full);
    assert_eq!(merged.status, BackupStatus::Ok);
    assert_eq!(merged.parent_id, None);
    assert_eq!(merged.merge_dest_id, None);
    assert!(merged.merge_time.is_some());
    assert!(!catalog.backup_path(full.id).exists());

    let restored = content::read_backup(&catalog, page.id).unwrap();
    assert_eq!(SimNode::row_count(&restored, &table), 20);
    node.assert_restores(&catalog, page.id);
}

#[test]
fn merge_long_chain_in_one_pass() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    node.create_table("accounts", 200);
    node.create_table("history", 5);

    let mut parent = node.full(&catalog).id;
    for i in 0..4 {
        node.insert_rows("history", 70);
        node.update_row("accounts", i * 50);
        parent = node.page(&catalog, parent).id;
    }
    let target = parent;

    let stats = merge::run(&catalog, target, &MergeOptions::default()).unwrap();
    assert_eq!(stats.chain_len, 5);
    assert_eq!(stats.backups_removed, 4);
    assert_eq!(ids(&catalog.list().unwrap()), vec![target]);
    node.assert_restores(&catalog, target);
}

#[test]
fn merge_middle_of_chain_keeps_later_backups_valid() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    node.create_table("t", 100);

    let full = node.full(&catalog);
    node.insert_rows("t", 40);
    let p1 = node.page(&catalog, full.id);
    node.update_row("t", 3);
    let p2 = node.page(&catalog, p1.id);

    merge::run(&catalog, p1.id, &MergeOptions::default()).unwrap();

    assert_eq!(ids(&catalog.list().unwrap()), vec![p1.id, p2.id]);
    let chain = chain::resolve(&catalog, p2.id).unwrap();
    assert_eq!(ids(&chain), vec![p1.id, p2.id]);
    node.assert_restores(&catalog, p1.id);
    node.assert_restores(&catalog, p2.id);
}

#[test]
fn merge_of_full_backup_is_a_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    node.create_table("t", 3);
    let full = node.full(&catalog);

    let stats = merge::run(&catalog, full.id, &MergeOptions::default()).unwrap();
    assert!(stats.nothing_to_merge);
    assert_eq!(catalog.get(full.id).unwrap(), full);
}

#[test]
fn merged_backup_can_be_merged_again() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    node.create_table("t", 30);

    let full = node.full(&catalog);
    node.insert_rows("t", 30);
    let p1 = node.page(&catalog, full.id);
    merge::run(&catalog, p1.id, &MergeOptions::default()).unwrap();

    node.insert_rows("t", 30);
    let p2 = node.page(&catalog, p1.id);
    merge::run(&catalog, p2.id, &MergeOptions::default()).unwrap();

    assert_eq!(ids(&catalog.list().unwrap()), vec![p2.id]);
    node.assert_restores(&catalog, p2.id);
}

#[test]
fn dropped_files_are_not_carried_into_merged_backup() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    node.create_table("keep", 20);
    let dropped = node.create_table("testdb", 200);

    let full = node.full(&catalog);
    node.drop_table("testdb");
    let page = node.page(&catalog, full.id);

    merge::run(&catalog, page.id, &MergeOptions::default()).unwrap();

    let merged = catalog.get(page.id).unwrap();
    let files = catalog.read_file_list(&merged).unwrap();
    assert!(!files.contains(&dropped));
    assert!(!catalog.content_path(&merged, &dropped).exists());
    node.assert_restores(&catalog, page.id);
}

#[test]
fn shrinking_and_growing_files_merge_correctly() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    let table = node.create_table("t", 300);

    let full = node.full(&catalog);
    node.truncate_table("t", 70);
    let p1 = node.page(&catalog, full.id);
    node.insert_rows("t", 100);
    let p2 = node.page(&catalog, p1.id);
    node.truncate_table("t", 0);
    let p3 = node.page(&catalog, p2.id);
    node.insert_rows("t", 1);
    let p4 = node.page(&catalog, p3.id);

    merge::run(&catalog, p4.id, &MergeOptions::default()).unwrap();
    let restored = content::read_backup(&catalog, p4.id).unwrap();
    assert_eq!(SimNode::row_count(&restored, &table), 1);
    node.assert_restores(&catalog, p4.id);
}

#[test]
fn incremental_stores_only_changed_pages() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    let table = node.create_table("t", 640);

    let full = node.full(&catalog);
    node.update_row("t", 5);
    node.update_row("t", 600);
    let page = node.page(&catalog, full.id);

    let files = catalog.read_file_list(&page).unwrap();
    let entry = files.get(&table).unwrap();
    assert_eq!(entry.n_blocks(), 10);
    assert_eq!(entry.stored_pages, 2);
    assert!(!files.get("PG_VERSION").unwrap().present);

    merge::run(&catalog, page.id, &MergeOptions::default()).unwrap();
    let merged = catalog.get(page.id).unwrap();
    let entry = catalog.read_file_list(&merged).unwrap().get(&table).cloned().unwrap();
    assert!(entry.is_complete());
    node.assert_restores(&catalog, page.id);
}

#[test]
fn mixed_compression_is_normalized_to_target() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    let table = node.create_table("t", 500);

    let full = node.backup(&catalog, BackupMode::Full, None, Compression::None, WalMode::Archive);
    node.insert_rows("t", 10);
    let p1 = node.backup(&catalog, BackupMode::Delta, Some(full.id), Compression::Lz4, WalMode::Archive);
    node.update_row("t", 1);
    let p2 = node.backup(
        &catalog,
        BackupMode::Ptrack,
        Some(p1.id),
        Compression::Zstd { level: 3 },
        WalMode::Stream,
    );

    merge::run(&catalog, p2.id, &MergeOptions::default()).unwrap();

    let merged = catalog.get(p2.id).unwrap();
    assert_eq!(merged.compression, Compression::Zstd { level: 3 });
    assert_eq!(merged.wal_mode, WalMode::Stream);
    let entry = catalog.read_file_list(&merged).unwrap().get(&table).cloned().unwrap();
    assert!(entry.compressed);
    let mut stored =
        PageFile::open(&catalog.content_path(&merged, &table), entry.n_blocks()).unwrap();
    for block in 0..entry.n_blocks() {
        assert_eq!(stored.read_body(block).unwrap().unwrap()[0], TAG_ZSTD);
    }
    node.assert_restores(&catalog, p2.id);
}

#[test]
fn parallel_merge_matches_sequential() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    for i in 0..8 {
        node.create_table(&format!("t{i}"), 100 + i * 37);
    }
    let full = node.full(&catalog);
    for i in 0..8 {
        node.insert_rows(&format!("t{i}"), 65);
    }
    let page = node.page(&catalog, full.id);

    let opts = MergeOptions {
        threads: 4,
        ..MergeOptions::default()
    };
    let stats = merge::run(&catalog, page.id, &opts).unwrap();
    assert_eq!(stats.files_total, stats.files_copied);
    node.assert_restores(&catalog, page.id);
}

#[test]
fn sibling_descendants_keep_their_chain() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    node.create_table("t", 50);

    let full = node.full(&catalog);
    node.insert_rows("t", 5);
    let p1 = node.page(&catalog, full.id);
    node.insert_rows("t", 5);
    let a = node.page(&catalog, p1.id);
    node.update_row("t", 0);
    let b = node.page(&catalog, p1.id);

    let stats = merge::run(&catalog, a.id, &MergeOptions::default()).unwrap();
    assert_eq!(stats.backups_retained, 2);
    assert_eq!(stats.backups_removed, 0);

    for id in [full.id, p1.id] {
        let meta = catalog.get(id).unwrap();
        assert_eq!(meta.status, BackupStatus::Ok);
        assert_eq!(meta.merge_dest_id, None);
    }
    assert_eq!(ids(&chain::resolve(&catalog, b.id).unwrap()), vec![full.id, p1.id, b.id]);
    node.assert_restores(&catalog, a.id);
    node.assert_restores(&catalog, b.id);

    // Once the last dependent is merged the ancestors go away.
    let stats = merge::run(&catalog, b.id, &MergeOptions::default()).unwrap();
    assert_eq!(stats.backups_removed, 2);
    assert_eq!(ids(&catalog.list().unwrap()), vec![a.id, b.id]);
    node.assert_restores(&catalog, a.id);
    node.assert_restores(&catalog, b.id);
}

#[test]
fn chain_is_followed_by_parent_link_not_time() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());

    // FULL stamped a year ahead, so its id sorts after its child's.
    let future = Utc::now() + Duration::days(365);
    let mut w = BackupWriter::begin(
        &catalog,
        BackupSpec {
            start_time: Some(future),
            ..BackupSpec::full(WalMode::Stream, Compression::None)
        },
    )
    .unwrap();
    w.add_file("base/1/1", &vec![1u8; 20_000], true, ChangeMap::Full).unwrap();
    let full = w.finish().unwrap();

    let mut w = BackupWriter::begin(
        &catalog,
        BackupSpec::incremental(BackupMode::Page, full.id, WalMode::Stream, Compression::Lz4),
    )
    .unwrap();
    let mut data = vec![1u8; 20_000];
    data[9000] = 2;
    w.add_file("base/1/1", &data, true, ChangeMap::Blocks([1].into()))
        .unwrap();
    let page = w.finish().unwrap();
    assert!(page.id < full.id);

    merge::run(&catalog, page.id, &MergeOptions::default()).unwrap();
    assert_eq!(ids(&catalog.list().unwrap()), vec![page.id]);
    let restored = content::read_backup(&catalog, page.id).unwrap();
    assert_eq!(restored["base/1/1"], data);
}

#[test]
fn missing_full_fails_without_touching_the_chain() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    node.create_table("t", 10);
    let full = node.full(&catalog);
    let p1 = node.page(&catalog, full.id);
    let p2 = node.page(&catalog, p1.id);
    catalog.remove_backup(full.id).unwrap();

    let err = merge::run(&catalog, p2.id, &MergeOptions::default()).unwrap_err();
    assert!(matches!(err, BurrowError::ChainBroken { backup_id, .. } if backup_id == p2.id));
    assert!(err
        .to_string()
        .contains(&format!("Parent full backup for the given backup {} was not found", p2.id)));

    for meta in [&p1, &p2] {
        assert_eq!(&catalog.get(meta.id).unwrap(), meta);
    }
    assert!(!catalog.content_root(p2.id, MERGED_CONTENT_DIR).exists());
}

#[test]
fn error_ancestor_breaks_the_chain() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    node.create_table("t", 10);
    let full = node.full(&catalog);
    let p1 = node.page(&catalog, full.id);
    let p2 = node.page(&catalog, p1.id);
    catalog.set_status(p1.id, BackupStatus::Error).unwrap();

    let err = merge::run(&catalog, p2.id, &MergeOptions::default()).unwrap_err();
    assert!(matches!(err, BurrowError::ChainBroken { .. }));
    assert_eq!(catalog.get(p2.id).unwrap().status, BackupStatus::Ok);
    assert_eq!(catalog.get(p1.id).unwrap().status, BackupStatus::Error);
}

#[test]
fn only_ok_or_merging_targets_can_be_merged() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    node.create_table("t", 10);
    let full = node.full(&catalog);
    let p1 = node.page(&catalog, full.id);
    catalog.set_status(p1.id, BackupStatus::Error).unwrap();

    let err = merge::run(&catalog, p1.id, &MergeOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        BurrowError::InvalidStatus { status: BackupStatus::Error, .. }
    ));
    assert!(matches!(
        merge::run(&catalog, BackupId(42), &MergeOptions::default()),
        Err(BurrowError::BackupNotFound(_))
    ));
}

#[test]
fn corrupted_page_aborts_merge_and_leaves_chain_merging() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    let table = node.create_table("t", 3 * 64);

    let full = node.full(&catalog);
    node.update_row("t", 0);
    let page = node.page(&catalog, full.id);

    // Flip a byte inside block 2 of the FULL copy; the PAGE backup only
    // stored block 0, so the merge has to read it.
    let path = catalog.content_path(&full, &table);
    let mut raw = fs::read(&path).unwrap();
    let record = 8 + 1 + 8192;
    raw[2 * record + 100] ^= 0xFF;
    fs::write(&path, raw).unwrap();

    let err = merge::run(&catalog, page.id, &MergeOptions::default()).unwrap_err();
    assert!(matches!(err, BurrowError::ContentCorruption { backup_id, .. } if backup_id == page.id));
    assert!(err
        .to_string()
        .starts_with(&format!("Merging of backup {} failed", page.id)));

    for id in [full.id, page.id] {
        let meta = catalog.get(id).unwrap();
        assert_eq!(meta.status, BackupStatus::Merging);
        assert_eq!(meta.merge_dest_id, Some(page.id));
    }
    // Still failing on retry, never silently committed.
    assert!(matches!(
        merge::run(&catalog, page.id, &MergeOptions::default()),
        Err(BurrowError::ContentCorruption { .. })
    ));
    assert_eq!(catalog.get(page.id).unwrap().mode, BackupMode::Page);
}

#[test]
fn zstd_level_change_recompresses_pages() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    let table = node.create_table("t", 3 * 64);

    let full = node.backup(
        &catalog,
        BackupMode::Full,
        None,
        Compression::Zstd { level: 1 },
        WalMode::Stream,
    );
    node.update_row("t", 0);
    let target = Compression::Zstd { level: 19 };
    let page = node.backup(&catalog, BackupMode::Page, Some(full.id), target, WalMode::Stream);

    merge::run(&catalog, page.id, &MergeOptions::default()).unwrap();

    // Blocks 1 and 2 come from the level-1 FULL and must be rewritten.
    let merged = catalog.get(page.id).unwrap();
    let entry = catalog.read_file_list(&merged).unwrap().get(&table).cloned().unwrap();
    let mut stored =
        PageFile::open(&catalog.content_path(&merged, &table), entry.n_blocks()).unwrap();
    let state = node.state_at(page.id);
    for (block, chunk) in split_pages(&state[&table]) {
        let body = stored.read_body(block).unwrap().unwrap();
        assert_eq!(body, compress(target, chunk).unwrap(), "block {block}");
    }
    node.assert_restores(&catalog, page.id);
}

/// Snapshot of every stored file under `root`, keyed by relative path.
fn stored_bytes(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut out = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for item in fs::read_dir(&dir).unwrap() {
            let path = item.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_path_buf();
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    out
}

#[test]
fn page_from_a_later_backup_spliced_into_delta_aborts_merge() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    let table = node.create_table("t", 3 * 64);

    let full = node.full(&catalog);
    node.update_row("t", 70);
    let delta = node.backup(
        &catalog,
        BackupMode::Delta,
        Some(full.id),
        Compression::None,
        WalMode::Stream,
    );
    node.update_row("t", 71);
    let later = node.backup(
        &catalog,
        BackupMode::Delta,
        Some(delta.id),
        Compression::None,
        WalMode::Stream,
    );

    // Both incrementals stored only block 1 of the table. Put the later
    // backup's valid record in place of the DELTA's own.
    let delta_path = catalog.content_path(&delta, &table);
    let later_record = fs::read(catalog.content_path(&later, &table)).unwrap();
    assert_eq!(later_record.len(), fs::read(&delta_path).unwrap().len());
    fs::write(&delta_path, later_record).unwrap();

    let full_root = catalog.content_root(full.id, DEFAULT_CONTENT_DIR);
    let before = stored_bytes(&full_root);

    let err = merge::run(&catalog, delta.id, &MergeOptions::default()).unwrap_err();
    assert!(matches!(err, BurrowError::ContentCorruption { backup_id, .. } if backup_id == delta.id));
    assert!(err.to_string().contains("content mismatch"));

    for id in [full.id, delta.id] {
        let meta = catalog.get(id).unwrap();
        assert_eq!(meta.status, BackupStatus::Merging);
        assert_eq!(meta.merge_dest_id, Some(delta.id));
    }
    assert_eq!(catalog.get(delta.id).unwrap().mode, BackupMode::Delta);
    assert_eq!(catalog.get(full.id).unwrap().content_dir, DEFAULT_CONTENT_DIR);
    assert!(stored_bytes(&full_root) == before, "FULL backup files changed");
}

#[test]
fn merging_a_backup_of_another_merge_conflicts() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    node.create_table("t", 10);
    let full = node.full(&catalog);
    let p1 = node.page(&catalog, full.id);
    let a = node.page(&catalog, p1.id);
    let b = node.page(&catalog, p1.id);

    // Leave a merge into `a` in flight.
    catalog
        .update(a.id, |m| {
            m.status = BackupStatus::Merging;
            m.merge_dest_id = Some(a.id);
        })
        .unwrap();
    catalog
        .update(p1.id, |m| {
            m.status = BackupStatus::Merging;
            m.merge_dest_id = Some(a.id);
        })
        .unwrap();

    let err = merge::run(&catalog, b.id, &MergeOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        BurrowError::ConcurrentMergeConflict { backup_id, dest } if backup_id == p1.id && dest == a.id
    ));
    assert_eq!(catalog.get(b.id).unwrap().status, BackupStatus::Ok);

    let err = merge::run(&catalog, p1.id, &MergeOptions::default()).unwrap_err();
    assert!(matches!(err, BurrowError::ConcurrentMergeConflict { .. }));
}

#[test]
fn expired_backups_need_merge_expired() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = init_catalog(tmp.path());
    let mut node = SimNode::new();
    node.create_table("t", 10);
    let full = node.full(&catalog);
    node.insert_rows("t", 10);
    let page = node.page(&catalog, full.id);

    let long_ago = Utc::now() - Duration::days(10);
    catalog
        .update(page.id, |m| m.stop_time = Some(long_ago))
        .unwrap();

    let policy = RetentionPolicy {
        window: Duration::days(7),
    };
    let opts = MergeOptions {
        retention: Some(policy),
        ..MergeOptions::default()
    };
    let err = merge::run(&catalog, page.id, &opts).unwrap_err();
    assert!(matches!(err, BurrowError::Expired(id) if id == page.id));
    assert_eq!(catalog.get(page.id).unwrap().status, BackupStatus::Ok);

    let opts = MergeOptions {
        retention: Some(policy),
        merge_expired: true,
        ..MergeOptions::default()
    };
    merge::run(&catalog, page.id, &opts).unwrap();
    node.assert_restores(&catalog, page.id);
}
