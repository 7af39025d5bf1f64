use thiserror::Error;

use crate::backup::{BackupId, BackupStatus};

pub type Result<T> = std::result::Result<T, BurrowError>;

#[derive(Debug, Error)]
pub enum BurrowError {
    #[error("Parent full backup for the given backup {backup_id} was not found: {reason}")]
    ChainBroken { backup_id: BackupId, reason: String },

    #[error("Merging of backup {backup_id} failed: {cause}")]
    ContentCorruption { backup_id: BackupId, cause: String },

    #[error("backup {backup_id} is already taking part in the merge into backup {dest}")]
    ConcurrentMergeConflict { backup_id: BackupId, dest: BackupId },

    #[error("failed to write catalog metadata of backup {backup_id}: {source}")]
    CatalogWriteFailure {
        backup_id: BackupId,
        #[source]
        source: std::io::Error,
    },

    #[error("backup {0} not found")]
    BackupNotFound(BackupId),

    #[error("instance '{0}' not found in the catalog")]
    InstanceNotFound(String),

    #[error("backup {backup_id}: status cannot change from {from} to {to}")]
    InvalidTransition {
        backup_id: BackupId,
        from: BackupStatus,
        to: BackupStatus,
    },

    #[error("backup {backup_id} has status {status}, {action} is not possible")]
    InvalidStatus {
        backup_id: BackupId,
        status: BackupStatus,
        action: &'static str,
    },

    #[error("backup {0} is outside the retention window; merging it requires merge_expired")]
    Expired(BackupId),

    #[error("invalid backup id: '{0}'")]
    InvalidBackupId(String),

    #[error("invalid page data in '{path}': {reason}")]
    InvalidPage { path: String, reason: String },

    #[error("file '{path}' is missing from backup {backup_id}")]
    MissingFile { backup_id: BackupId, path: String },

    #[error("unknown compression tag: {0}")]
    UnknownCompressionTag(u8),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(String),
}

impl BurrowError {
    /// Wrap an error raised while rebuilding a file of `backup_id` so the
    /// caller sees a single merge failure naming the target backup.
    pub(crate) fn into_merge_failure(self, backup_id: BackupId) -> Self {
        match self {
            e @ (BurrowError::InvalidPage { .. }
            | BurrowError::MissingFile { .. }
            | BurrowError::Decompression(_)
            | BurrowError::UnknownCompressionTag(_)) => BurrowError::ContentCorruption {
                backup_id,
                cause: e.to_string(),
            },
            other => other,
        }
    }
}
