use chrono::Utc;
use tracing::info;

use crate::backup::{BackupMeta, BackupMode, BackupStatus, FileList, MERGED_CONTENT_DIR};
use crate::catalog::Catalog;
use crate::error::{BurrowError, Result};
use crate::failpoint::{self, FailPoints, MERGE_PUBLISH, MERGE_WRITE_FILELIST};

/// Make the merged output the target's content and release the target.
///
/// The file list is renamed into place first. The control record then moves
/// from MERGING incremental to OK FULL in one atomic write, so a reader sees
/// either the old chain or the merged backup. Absorbed ancestors keep
/// `merge_dest_id` until reclaim removes them.
pub(super) fn publish(
    catalog: &Catalog,
    target: &BackupMeta,
    files: &FileList,
    failpoints: Option<&FailPoints>,
) -> Result<BackupMeta> {
    let staged = catalog.stage_file_list(target.id, MERGED_CONTENT_DIR, files)?;
    failpoint::hit(failpoints, MERGE_WRITE_FILELIST)?;
    staged
        .publish()
        .map_err(|e| BurrowError::CatalogWriteFailure {
            backup_id: target.id,
            source: e,
        })?;

    let data_bytes = files.stored_bytes();
    let meta = catalog.update(target.id, |m| {
        m.mode = BackupMode::Full;
        m.parent_id = None;
        m.content_dir = MERGED_CONTENT_DIR.to_string();
        m.merge_time = Some(Utc::now());
        m.data_bytes = data_bytes;
        m.status = BackupStatus::Ok;
        m.merge_dest_id = None;
    })?;
    info!(backup = %target.id, files = files.len(), "merged output published");
    failpoint::hit(failpoints, MERGE_PUBLISH)?;
    Ok(meta)
}
