use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::BufWriter;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::Catalog;
use crate::backup::file::n_blocks;
use crate::backup::{
    BackupId, BackupMeta, BackupMode, BackupStatus, FileEntry, FileList, WalMode,
    DEFAULT_CONTENT_DIR,
};
use crate::checksum::Checksum;
use crate::compress::{compress, Compression};
use crate::error::{BurrowError, Result};
use crate::page::{split_pages, PageWriter};

/// What the backup collaborator wants registered.
#[derive(Debug, Clone)]
pub struct BackupSpec {
    pub mode: BackupMode,
    pub parent: Option<BackupId>,
    pub wal_mode: WalMode,
    pub compression: Compression,
    /// Defaults to now. Also determines the backup id.
    pub start_time: Option<DateTime<Utc>>,
}

impl BackupSpec {
    pub fn full(wal_mode: WalMode, compression: Compression) -> Self {
        Self {
            mode: BackupMode::Full,
            parent: None,
            wal_mode,
            compression,
            start_time: None,
        }
    }

    pub fn incremental(
        mode: BackupMode,
        parent: BackupId,
        wal_mode: WalMode,
        compression: Compression,
    ) -> Self {
        Self {
            mode,
            parent: Some(parent),
            wal_mode,
            compression,
            start_time: None,
        }
    }
}

/// Pages of a data file that changed since the parent backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeMap {
    /// No tracking information; every page is stored.
    Full,
    Blocks(BTreeSet<u32>),
}

/// Registers one backup: RUNNING on `begin`, OK on `finish`, ERROR on `fail`.
pub struct BackupWriter<'a> {
    catalog: &'a Catalog,
    meta: BackupMeta,
    parent_files: Option<FileList>,
    files: FileList,
}

impl<'a> BackupWriter<'a> {
    pub fn begin(catalog: &'a Catalog, spec: BackupSpec) -> Result<Self> {
        let parent_files = match (spec.mode, spec.parent) {
            (BackupMode::Full, None) => None,
            (BackupMode::Full, Some(_)) => {
                return Err(BurrowError::Other(
                    "a FULL backup cannot have a parent".into(),
                ))
            }
            (mode, None) => {
                return Err(BurrowError::Other(format!(
                    "a {mode} backup needs a parent"
                )))
            }
            (_, Some(parent_id)) => {
                let parent = catalog.get(parent_id)?;
                if parent.status != BackupStatus::Ok {
                    return Err(BurrowError::InvalidStatus {
                        backup_id: parent_id,
                        status: parent.status,
                        action: "taking an incremental backup on top of it",
                    });
                }
                Some(catalog.read_file_list(&parent)?)
            }
        };

        let start_time = spec.start_time.unwrap_or_else(Utc::now);
        let mut id = BackupId::from_time(start_time);
        while catalog.contains(id) {
            id = BackupId(id.0 + 1);
        }

        let meta = BackupMeta {
            id,
            mode: spec.mode,
            status: BackupStatus::Running,
            parent_id: spec.parent,
            wal_mode: spec.wal_mode,
            compression: spec.compression,
            start_time,
            stop_time: None,
            merge_dest_id: None,
            merge_time: None,
            content_dir: DEFAULT_CONTENT_DIR.to_string(),
            data_bytes: 0,
        };
        catalog.create(&meta)?;
        fs::create_dir_all(catalog.content_root(id, DEFAULT_CONTENT_DIR))?;
        info!(backup = %id, mode = %meta.mode, parent = ?meta.parent_id, "backup started");

        Ok(Self {
            catalog,
            meta,
            parent_files,
            files: FileList::new(),
        })
    }

    pub fn id(&self) -> BackupId {
        self.meta.id
    }

    /// Record the current content of `path`. For incremental backups only
    /// pages that differ from the parent are stored.
    pub fn add_file(
        &mut self,
        path: &str,
        content: &[u8],
        is_datafile: bool,
        changes: ChangeMap,
    ) -> Result<()> {
        let size = content.len() as u64;
        let checksum = Checksum::of(content);
        let blocks = n_blocks(size);
        let parent = self.parent_files.as_ref().and_then(|files| files.get(path));

        let to_store: BTreeSet<u32> = match parent {
            None => (0..blocks).collect(),
            Some(prev) if !is_datafile => {
                if prev.checksum == checksum && prev.size == size {
                    BTreeSet::new()
                } else {
                    (0..blocks).collect()
                }
            }
            Some(prev) => match changes {
                ChangeMap::Full => (0..blocks).collect(),
                ChangeMap::Blocks(changed) => {
                    let prev_blocks = prev.n_blocks();
                    let mut set: BTreeSet<u32> =
                        changed.into_iter().filter(|b| *b < blocks).collect();
                    set.extend(prev_blocks.min(blocks)..blocks);
                    if prev.size != size && blocks > 0 {
                        set.insert(blocks - 1);
                    }
                    set
                }
            },
        };
        let present = parent.is_none() || !to_store.is_empty();

        let mut write_size = 0;
        if present {
            let dest = self.catalog.content_path(&self.meta, path);
            if let Some(dir) = dest.parent() {
                fs::create_dir_all(dir)?;
            }
            let file = File::create(&dest)?;
            let mut writer = PageWriter::new(BufWriter::new(file));
            for (block, page) in split_pages(content) {
                if to_store.contains(&block) {
                    let body = compress(self.meta.compression, page)?;
                    writer.write_page(block, &body)?;
                }
            }
            write_size = writer.bytes_written();
            let file = writer
                .into_inner()
                .into_inner()
                .map_err(|e| BurrowError::Io(e.into_error()))?;
            file.sync_all()?;
        }
        debug!(
            backup = %self.meta.id,
            path,
            stored_pages = to_store.len(),
            "file registered"
        );

        self.meta.data_bytes += write_size;
        self.files.insert(FileEntry {
            path: path.to_string(),
            size,
            checksum,
            is_datafile,
            present,
            compressed: present && self.meta.compression.is_compressed(),
            stored_pages: to_store.len() as u32,
            write_size,
        });
        Ok(())
    }

    /// Publish the file list and mark the backup OK.
    pub fn finish(self) -> Result<BackupMeta> {
        self.complete(BackupStatus::Ok)
    }

    /// Mark the backup ERROR. Its storage is kept for inspection.
    pub fn fail(self) -> Result<BackupMeta> {
        self.complete(BackupStatus::Error)
    }

    fn complete(self, status: BackupStatus) -> Result<BackupMeta> {
        let id = self.meta.id;
        self.catalog
            .write_file_list(id, DEFAULT_CONTENT_DIR, &self.files)?;
        let data_bytes = self.meta.data_bytes;
        let meta = self.catalog.update(id, |m| {
            m.status = status;
            m.stop_time = Some(Utc::now().max(m.start_time));
            m.data_bytes = data_bytes;
        })?;
        info!(backup = %id, status = %status, files = self.files.len(), "backup finished");
        Ok(meta)
    }
}
