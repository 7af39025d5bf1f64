use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;

/// Size of a data page.
pub const BLOCK_SIZE: u64 = 8192;

/// Number of pages needed to hold `size` logical bytes.
pub fn n_blocks(size: u64) -> u32 {
    size.div_ceil(BLOCK_SIZE) as u32
}

/// One file of a backup. `size` and `checksum` always describe the logical
/// content at this backup's point in time, even when nothing is stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub checksum: Checksum,
    #[serde(default)]
    pub is_datafile: bool,
    /// A physical file exists for this entry.
    pub present: bool,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub stored_pages: u32,
    /// Bytes on disk.
    #[serde(default)]
    pub write_size: u64,
}

impl FileEntry {
    pub fn n_blocks(&self) -> u32 {
        n_blocks(self.size)
    }

    /// Every page of the file is stored in this backup.
    pub fn is_complete(&self) -> bool {
        self.present && self.stored_pages == self.n_blocks()
    }
}

/// Files of a backup keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileList {
    files: BTreeMap<String, FileEntry>,
}

impl FileList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: FileEntry) -> Option<FileEntry> {
        self.files.insert(entry.path.clone(), entry)
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.values()
    }

    /// Physical bytes stored by this list.
    pub fn stored_bytes(&self) -> u64 {
        self.iter().filter(|e| e.present).map(|e| e.write_size).sum()
    }
}

impl FromIterator<FileEntry> for FileList {
    fn from_iter<I: IntoIterator<Item = FileEntry>>(iter: I) -> Self {
        let mut list = FileList::new();
        for entry in iter {
            list.insert(entry);
        }
        list
    }
}
