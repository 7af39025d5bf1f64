//! Reconstruction of logical file content from a backup chain.
//!
//! A file's pages are spread over the chain: the newest complete copy plus
//! the pages every later backup stored on top of it. Layers are applied
//! oldest first, each overlaying its stored pages and truncating to its own
//! logical size.

use std::collections::BTreeMap;
use std::io;

use crate::backup::file::BLOCK_SIZE;
use crate::backup::{BackupId, BackupMeta, FileEntry, FileList};
use crate::catalog::Catalog;
use crate::chain;
use crate::checksum::{ContentHasher, FileDigest};
use crate::compress::{decompress_page, Compression};
use crate::error::{BurrowError, Result};
use crate::page::PageFile;

/// A chain member with its file list loaded.
#[derive(Debug)]
pub struct ChainMember {
    pub meta: BackupMeta,
    pub files: FileList,
}

/// A resolved chain, oldest first.
#[derive(Debug)]
pub struct ChainView {
    members: Vec<ChainMember>,
}

/// One backup's contribution to a file.
#[derive(Debug, Clone, Copy)]
pub struct Layer<'a> {
    pub meta: &'a BackupMeta,
    pub entry: &'a FileEntry,
}

impl ChainView {
    pub fn load(catalog: &Catalog, chain: Vec<BackupMeta>) -> Result<Self> {
        let members = chain
            .into_iter()
            .map(|meta| {
                let files = catalog.read_file_list(&meta)?;
                Ok(ChainMember { meta, files })
            })
            .collect::<Result<Vec<_>>>()?;
        if members.is_empty() {
            return Err(BurrowError::Other("empty backup chain".into()));
        }
        Ok(Self { members })
    }

    pub fn target(&self) -> &ChainMember {
        &self.members[self.members.len() - 1]
    }

    /// Layers needed to rebuild `path` as of the target, oldest first.
    pub fn layers_for(&self, path: &str) -> Result<Vec<Layer<'_>>> {
        let mut layers = Vec::new();
        let mut complete = false;
        for member in self.members.iter().rev() {
            let Some(entry) = member.files.get(path) else {
                break;
            };
            layers.push(Layer {
                meta: &member.meta,
                entry,
            });
            if entry.is_complete() {
                complete = true;
                break;
            }
        }
        let oldest = layers
            .last()
            .map(|l| l.meta.id)
            .unwrap_or(self.target().meta.id);
        if !complete {
            return Err(BurrowError::MissingFile {
                backup_id: oldest,
                path: format!("{path} (no complete copy in the chain)"),
            });
        }
        layers.reverse();
        Ok(layers)
    }
}

/// An encoded page as stored by one chain member.
#[derive(Debug)]
pub struct StoredPage {
    pub backup_id: BackupId,
    /// Codec settings of the backup that wrote the page.
    pub compression: Compression,
    pub body: Vec<u8>,
}

struct Source {
    backup_id: BackupId,
    compression: Compression,
    file: PageFile,
}

/// Page map of one file: for each block, the stored file it comes from.
/// Stored files stay open and each body is read when its block is reached.
pub struct FileAssembler {
    path: String,
    size: u64,
    sources: Vec<Source>,
    blocks: BTreeMap<u32, usize>,
}

impl FileAssembler {
    pub fn new(catalog: &Catalog, path: &str, layers: &[Layer<'_>]) -> Result<Self> {
        let mut sources = Vec::new();
        let mut blocks = BTreeMap::new();
        let mut size = 0;
        for layer in layers {
            let n = layer.entry.n_blocks();
            if layer.entry.present {
                let location = catalog.content_path(layer.meta, path);
                let file = PageFile::open(&location, n).map_err(|e| match e {
                    BurrowError::Io(ref io) if io.kind() == io::ErrorKind::NotFound => {
                        BurrowError::MissingFile {
                            backup_id: layer.meta.id,
                            path: path.to_string(),
                        }
                    }
                    other => other,
                })?;
                let idx = sources.len();
                for block in file.blocks() {
                    blocks.insert(block, idx);
                }
                sources.push(Source {
                    backup_id: layer.meta.id,
                    compression: layer.meta.compression,
                    file,
                });
            }
            // Pages past this layer's end of file belong to a larger
            // earlier version.
            blocks.retain(|block, _| *block < n);
            size = layer.entry.size;
        }
        Ok(Self {
            path: path.to_string(),
            size,
            sources,
            blocks,
        })
    }

    pub fn n_blocks(&self) -> u32 {
        crate::backup::file::n_blocks(self.size)
    }

    /// Read the encoded body of `block` from the newest layer storing it.
    pub fn page(&mut self, block: u32) -> Result<StoredPage> {
        let missing = || BurrowError::InvalidPage {
            path: self.path.clone(),
            reason: format!("block {block} is not stored anywhere in the chain"),
        };
        let idx = *self.blocks.get(&block).ok_or_else(missing)?;
        let source = &mut self.sources[idx];
        let body = source.file.read_body(block)?.ok_or_else(missing)?;
        Ok(StoredPage {
            backup_id: source.backup_id,
            compression: source.compression,
            body,
        })
    }

    fn expected_page_len(&self, block: u32) -> usize {
        let start = u64::from(block) * BLOCK_SIZE;
        (self.size - start).min(BLOCK_SIZE) as usize
    }

    /// Decode every page in order, hashing the result. `sink` receives the
    /// block number, stored page and decoded page.
    pub fn rebuild<F>(&mut self, mut sink: F) -> Result<FileDigest>
    where
        F: FnMut(u32, &StoredPage, &[u8]) -> Result<()>,
    {
        let mut hasher = ContentHasher::new();
        for block in 0..self.n_blocks() {
            let stored = self.page(block)?;
            let page = decompress_page(&stored.body)?;
            let expected = self.expected_page_len(block);
            if page.len() != expected {
                return Err(BurrowError::InvalidPage {
                    path: self.path.clone(),
                    reason: format!(
                        "block {block} from backup {} decodes to {} bytes, expected {expected}",
                        stored.backup_id,
                        page.len(),
                    ),
                });
            }
            hasher.update(&page);
            sink(block, &stored, &page)?;
        }
        Ok(hasher.finish())
    }
}

/// Compare a rebuilt file with the descriptor it must match.
pub fn verify_digest(entry: &FileEntry, digest: &FileDigest) -> Result<()> {
    if digest.size != entry.size || digest.checksum != entry.checksum {
        return Err(BurrowError::InvalidPage {
            path: entry.path.clone(),
            reason: format!(
                "content mismatch: expected {} bytes with checksum {}, got {} bytes with checksum {}",
                entry.size, entry.checksum, digest.size, digest.checksum
            ),
        });
    }
    Ok(())
}

/// Rebuild and check one file of the chain's target.
fn rebuild_verified<F>(catalog: &Catalog, view: &ChainView, entry: &FileEntry, sink: F) -> Result<()>
where
    F: FnMut(u32, &StoredPage, &[u8]) -> Result<()>,
{
    let layers = view.layers_for(&entry.path)?;
    let mut assembler = FileAssembler::new(catalog, &entry.path, &layers)?;
    let digest = assembler.rebuild(sink)?;
    verify_digest(entry, &digest)
}

/// Logical content of every file of backup `id`.
pub fn read_backup(catalog: &Catalog, id: BackupId) -> Result<BTreeMap<String, Vec<u8>>> {
    let view = ChainView::load(catalog, chain::resolve(catalog, id)?)?;
    let mut out = BTreeMap::new();
    for entry in view.target().files.iter() {
        let mut content = Vec::with_capacity(entry.size as usize);
        rebuild_verified(catalog, &view, entry, |_, _, page| {
            content.extend_from_slice(page);
            Ok(())
        })?;
        out.insert(entry.path.clone(), content);
    }
    Ok(out)
}

/// Rebuild every file of backup `id` without keeping the data. Returns the
/// number of files checked.
pub fn verify_backup(catalog: &Catalog, id: BackupId) -> Result<usize> {
    let view = ChainView::load(catalog, chain::resolve(catalog, id)?)?;
    for entry in view.target().files.iter() {
        rebuild_verified(catalog, &view, entry, |_, _, _| Ok(()))?;
    }
    Ok(view.target().files.len())
}
