pub mod file;
pub mod status;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::compress::Compression;
use crate::error::{BurrowError, Result};

pub use self::file::{FileEntry, FileList};
pub use self::status::BackupStatus;

/// Directory holding the files registered by the backup collaborator.
pub const DEFAULT_CONTENT_DIR: &str = "database";
/// Directory a merge writes its consolidated output into.
pub const MERGED_CONTENT_DIR: &str = "merged";

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Backup identifier: the backup's start time in Unix seconds, rendered in
/// uppercase base 36.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupId(pub u64);

impl BackupId {
    pub fn from_time(time: DateTime<Utc>) -> Self {
        BackupId(time.timestamp().max(0) as u64)
    }

    pub fn to_base36(self) -> String {
        if self.0 == 0 {
            return "0".to_string();
        }
        let mut n = self.0;
        let mut out = Vec::new();
        while n > 0 {
            out.push(BASE36[(n % 36) as usize]);
            n /= 36;
        }
        out.reverse();
        String::from_utf8(out).unwrap_or_default()
    }

    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.len() > 13 {
            return Err(BurrowError::InvalidBackupId(s.to_string()));
        }
        let mut n: u64 = 0;
        for c in trimmed.chars() {
            let digit = c
                .to_digit(36)
                .ok_or_else(|| BurrowError::InvalidBackupId(s.to_string()))?;
            n = n
                .checked_mul(36)
                .and_then(|v| v.checked_add(u64::from(digit)))
                .ok_or_else(|| BurrowError::InvalidBackupId(s.to_string()))?;
        }
        Ok(BackupId(n))
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base36())
    }
}

impl fmt::Debug for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackupId({})", self.to_base36())
    }
}

impl FromStr for BackupId {
    type Err = BurrowError;

    fn from_str(s: &str) -> Result<Self> {
        BackupId::parse(s)
    }
}

impl Serialize for BackupId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base36())
    }
}

impl<'de> Deserialize<'de> for BackupId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BackupId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackupMode {
    Full,
    Page,
    Delta,
    Ptrack,
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackupMode::Full => "FULL",
            BackupMode::Page => "PAGE",
            BackupMode::Delta => "DELTA",
            BackupMode::Ptrack => "PTRACK",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WalMode {
    Archive,
    Stream,
}

impl fmt::Display for WalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WalMode::Archive => "ARCHIVE",
            WalMode::Stream => "STREAM",
        })
    }
}

/// Control record of a backup, stored at `<id>/backup.control`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMeta {
    pub id: BackupId,
    pub mode: BackupMode,
    pub status: BackupStatus,
    #[serde(default)]
    pub parent_id: Option<BackupId>,
    pub wal_mode: WalMode,
    #[serde(default)]
    pub compression: Compression,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub stop_time: Option<DateTime<Utc>>,
    /// Backup whose identity an in-flight merge produces. Set on every
    /// participant while the merge runs.
    #[serde(default)]
    pub merge_dest_id: Option<BackupId>,
    #[serde(default)]
    pub merge_time: Option<DateTime<Utc>>,
    #[serde(default = "default_content_dir")]
    pub content_dir: String,
    #[serde(default)]
    pub data_bytes: u64,
}

fn default_content_dir() -> String {
    DEFAULT_CONTENT_DIR.to_string()
}

impl BackupMeta {
    pub fn is_full(&self) -> bool {
        self.mode == BackupMode::Full
    }

    /// True once a merge into this backup has published its output.
    pub fn merge_published(&self) -> bool {
        self.is_full() && self.content_dir == MERGED_CONTENT_DIR
    }

    /// Time the backup's data is consistent to; used for retention.
    pub fn recovery_time(&self) -> DateTime<Utc> {
        self.stop_time.unwrap_or(self.start_time)
    }
}
