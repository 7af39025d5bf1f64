pub mod writer;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::backup::{BackupId, BackupMeta, BackupStatus, FileList};
use crate::error::{BurrowError, Result};
use crate::platform::fs::{
    atomic_write, read_optional, remove_dir_all_if_exists, remove_file_if_exists, StagedFile,
};

pub use self::writer::{BackupSpec, BackupWriter, ChangeMap};

const BACKUPS_DIR: &str = "backups";
const CONTROL_FILE: &str = "backup.control";
const FILE_LIST_SUFFIX: &str = ".filelist";

/// Durable registry of the backups of one instance.
///
/// ```text
/// <backup_dir>/backups/<instance>/<ID>/backup.control
/// <backup_dir>/backups/<instance>/<ID>/<content_dir>.filelist
/// <backup_dir>/backups/<instance>/<ID>/<content_dir>/<path>
/// ```
#[derive(Debug, Clone)]
pub struct Catalog {
    instance: String,
    dir: PathBuf,
}

impl Catalog {
    /// Create the instance directory if needed and open it.
    pub fn init(backup_dir: &Path, instance: &str) -> Result<Self> {
        let dir = instance_dir(backup_dir, instance);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            instance: instance.to_string(),
            dir,
        })
    }

    pub fn open(backup_dir: &Path, instance: &str) -> Result<Self> {
        let dir = instance_dir(backup_dir, instance);
        if !dir.is_dir() {
            return Err(BurrowError::InstanceNotFound(instance.to_string()));
        }
        Ok(Self {
            instance: instance.to_string(),
            dir,
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn backup_path(&self, id: BackupId) -> PathBuf {
        self.dir.join(id.to_string())
    }

    fn control_path(&self, id: BackupId) -> PathBuf {
        self.backup_path(id).join(CONTROL_FILE)
    }

    pub fn file_list_path(&self, id: BackupId, content_dir: &str) -> PathBuf {
        self.backup_path(id)
            .join(format!("{content_dir}{FILE_LIST_SUFFIX}"))
    }

    pub fn content_root(&self, id: BackupId, content_dir: &str) -> PathBuf {
        self.backup_path(id).join(content_dir)
    }

    /// Physical location of `rel` inside the current content of `meta`.
    pub fn content_path(&self, meta: &BackupMeta, rel: &str) -> PathBuf {
        self.content_root(meta.id, &meta.content_dir).join(rel)
    }

    /// All readable backups, oldest first. Directories without a readable
    /// control record are skipped.
    pub fn list(&self) -> Result<Vec<BackupMeta>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|s| BackupId::parse(s).ok()) else {
                warn!(entry = ?name, "skipping unexpected catalog entry");
                continue;
            };
            match self.try_get(id) {
                Ok(Some(meta)) => out.push(meta),
                Ok(None) => warn!(backup = %id, "skipping backup without control record"),
                Err(e) => warn!(backup = %id, error = %e, "skipping unreadable backup"),
            }
        }
        out.sort_by_key(|m| m.id);
        Ok(out)
    }

    pub fn get(&self, id: BackupId) -> Result<BackupMeta> {
        self.try_get(id)?.ok_or(BurrowError::BackupNotFound(id))
    }

    pub fn try_get(&self, id: BackupId) -> Result<Option<BackupMeta>> {
        let Some(data) = read_optional(&self.control_path(id))? else {
            return Ok(None);
        };
        let meta: BackupMeta = serde_json::from_slice(&data)?;
        if meta.id != id {
            return Err(BurrowError::Other(format!(
                "control record of {id} names backup {}",
                meta.id
            )));
        }
        Ok(Some(meta))
    }

    pub fn contains(&self, id: BackupId) -> bool {
        self.control_path(id).is_file()
    }

    /// Register a new backup directory. Fails if the id is taken.
    pub fn create(&self, meta: &BackupMeta) -> Result<()> {
        let path = self.backup_path(meta.id);
        fs::create_dir(&path).map_err(|e| BurrowError::CatalogWriteFailure {
            backup_id: meta.id,
            source: e,
        })?;
        self.write_meta(meta)
    }

    /// Atomically replace the control record of `meta.id`.
    pub fn write_meta(&self, meta: &BackupMeta) -> Result<()> {
        let data = serde_json::to_vec_pretty(meta)?;
        atomic_write(&self.control_path(meta.id), &data).map_err(|e| {
            BurrowError::CatalogWriteFailure {
                backup_id: meta.id,
                source: e,
            }
        })
    }

    /// Apply `f` to the record of `id` and persist it. The status change, if
    /// any, must be a legal transition.
    pub fn update<F>(&self, id: BackupId, f: F) -> Result<BackupMeta>
    where
        F: FnOnce(&mut BackupMeta),
    {
        let before = self.get(id)?;
        let mut after = before.clone();
        f(&mut after);
        after.id = id;
        if !before.status.can_transition_to(after.status) {
            return Err(BurrowError::InvalidTransition {
                backup_id: id,
                from: before.status,
                to: after.status,
            });
        }
        if after != before {
            self.write_meta(&after)?;
            if after.status != before.status {
                debug!(backup = %id, from = %before.status, to = %after.status, "status changed");
            }
        }
        Ok(after)
    }

    pub fn set_status(&self, id: BackupId, status: BackupStatus) -> Result<BackupMeta> {
        self.update(id, |meta| meta.status = status)
    }

    /// File list of the backup's current content.
    pub fn read_file_list(&self, meta: &BackupMeta) -> Result<FileList> {
        let path = self.file_list_path(meta.id, &meta.content_dir);
        let data = read_optional(&path)?.ok_or_else(|| BurrowError::MissingFile {
            backup_id: meta.id,
            path: path.display().to_string(),
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// First half of a two-phase file list write.
    pub fn stage_file_list(
        &self,
        id: BackupId,
        content_dir: &str,
        list: &FileList,
    ) -> Result<StagedFile> {
        let data = serde_json::to_vec(list)?;
        StagedFile::stage(&self.file_list_path(id, content_dir), &data).map_err(|e| {
            BurrowError::CatalogWriteFailure {
                backup_id: id,
                source: e,
            }
        })
    }

    pub fn write_file_list(&self, id: BackupId, content_dir: &str, list: &FileList) -> Result<()> {
        self.stage_file_list(id, content_dir, list)?
            .publish()
            .map_err(|e| BurrowError::CatalogWriteFailure {
                backup_id: id,
                source: e,
            })
    }

    /// Delete a content directory and its file list. Missing pieces are fine.
    pub fn remove_content(&self, id: BackupId, content_dir: &str) -> Result<()> {
        remove_file_if_exists(&self.file_list_path(id, content_dir))?;
        remove_dir_all_if_exists(&self.content_root(id, content_dir))?;
        Ok(())
    }

    /// Delete everything stored for `id`, control record last.
    pub fn remove_backup(&self, id: BackupId) -> Result<()> {
        let path = self.backup_path(id);
        let Ok(entries) = fs::read_dir(&path) else {
            return Ok(());
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_name() == CONTROL_FILE {
                continue;
            }
            if entry.file_type()?.is_dir() {
                remove_dir_all_if_exists(&entry.path())?;
            } else {
                remove_file_if_exists(&entry.path())?;
            }
        }
        remove_dir_all_if_exists(&path)?;
        Ok(())
    }
}

fn instance_dir(backup_dir: &Path, instance: &str) -> PathBuf {
    backup_dir.join(BACKUPS_DIR).join(instance)
}
