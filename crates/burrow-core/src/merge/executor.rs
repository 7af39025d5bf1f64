use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use rayon::prelude::*;
use tracing::debug;

use super::MergeOptions;
use crate::backup::{FileEntry, FileList, MERGED_CONTENT_DIR};
use crate::catalog::Catalog;
use crate::checksum::ContentHasher;
use crate::commands::util::check_interrupted;
use crate::compress::{body_tag, compress, decompress_page, Compression};
use crate::content::{verify_digest, ChainView, FileAssembler, StoredPage};
use crate::error::{BurrowError, Result};
use crate::failpoint::{self, MERGE_COPY_FILE};
use crate::page::{PageFile, PageWriter};

pub(super) struct WorkOutput {
    pub files: FileList,
    pub copied: usize,
    pub skipped: usize,
    pub bytes_written: u64,
}

enum Outcome {
    Copied,
    Skipped,
}

fn build_pool(threads: usize) -> Result<Option<rayon::ThreadPool>> {
    if threads == 1 {
        return Ok(None);
    }
    let mut builder = rayon::ThreadPoolBuilder::new();
    if threads > 1 {
        builder = builder.num_threads(threads);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| BurrowError::Other(format!("failed to create merge thread pool: {e}")))
}

/// Rebuild every file of the chain's target into its `merged` directory.
pub(super) fn execute(
    catalog: &Catalog,
    view: &ChainView,
    opts: &MergeOptions<'_>,
) -> Result<WorkOutput> {
    let target = &view.target().meta;
    let out_root = catalog.content_root(target.id, MERGED_CONTENT_DIR);
    fs::create_dir_all(&out_root)?;

    let tasks: Vec<&FileEntry> = view.target().files.iter().collect();
    let do_work = |entry: &&FileEntry| -> Result<(FileEntry, Outcome)> {
        check_interrupted(opts.shutdown)?;
        let result = merge_file(catalog, view, entry, target.compression, &out_root)
            .map_err(|e| e.into_merge_failure(target.id))?;
        failpoint::hit(opts.failpoints, MERGE_COPY_FILE)?;
        Ok(result)
    };

    let results: Vec<(FileEntry, Outcome)> = match build_pool(opts.threads)? {
        Some(pool) => pool.install(|| tasks.par_iter().map(do_work).collect::<Result<_>>())?,
        None => tasks.iter().map(do_work).collect::<Result<_>>()?,
    };

    let mut out = WorkOutput {
        files: FileList::new(),
        copied: 0,
        skipped: 0,
        bytes_written: 0,
    };
    for (entry, outcome) in results {
        match outcome {
            Outcome::Copied => {
                out.copied += 1;
                out.bytes_written += entry.write_size;
            }
            Outcome::Skipped => out.skipped += 1,
        }
        out.files.insert(entry);
    }
    Ok(out)
}

fn merge_file(
    catalog: &Catalog,
    view: &ChainView,
    entry: &FileEntry,
    compression: Compression,
    out_root: &Path,
) -> Result<(FileEntry, Outcome)> {
    let target_id = view.target().meta.id;
    let dest = out_root.join(&entry.path);

    if let Some(write_size) = staged_copy_matches(&dest, entry) {
        debug!(backup = %target_id, path = %entry.path, "already merged, skipping");
        return Ok((merged_entry(entry, compression, write_size), Outcome::Skipped));
    }

    let layers = view.layers_for(&entry.path)?;
    let mut assembler = FileAssembler::new(catalog, &entry.path, &layers)?;

    if let Some(dir) = dest.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = File::create(&dest)?;
    let mut writer = PageWriter::new(BufWriter::new(file));
    let digest = assembler.rebuild(|block, stored, page| {
        if reusable_body(stored, compression) {
            writer.write_page(block, &stored.body)?;
        } else {
            writer.write_page(block, &compress(compression, page)?)?;
        }
        Ok(())
    })?;
    verify_digest(entry, &digest)?;

    let write_size = writer.bytes_written();
    let file = writer
        .into_inner()
        .into_inner()
        .map_err(|e| BurrowError::Io(e.into_error()))?;
    file.sync_all()?;

    debug!(
        backup = %target_id,
        path = %entry.path,
        layers = layers.len(),
        bytes = write_size,
        "file merged"
    );
    Ok((merged_entry(entry, compression, write_size), Outcome::Copied))
}

/// A stored body can be copied verbatim only when its backup used exactly the
/// target's codec settings, zstd level included.
fn reusable_body(stored: &StoredPage, target: Compression) -> bool {
    stored.compression == target && body_tag(&stored.body) == Some(target.tag())
}

/// Size on disk of a staged output file that already holds the expected
/// content, if any.
fn staged_copy_matches(dest: &Path, entry: &FileEntry) -> Option<u64> {
    let n = entry.n_blocks();
    let mut staged = PageFile::open(dest, n).ok()?;
    if staged.page_count() != n {
        return None;
    }
    let mut hasher = ContentHasher::new();
    for block in 0..n {
        let body = staged.read_body(block).ok()??;
        let page = decompress_page(&body).ok()?;
        hasher.update(&page);
    }
    let digest = hasher.finish();
    if digest.size != entry.size || digest.checksum != entry.checksum {
        return None;
    }
    fs::metadata(dest).ok().map(|m| m.len())
}

fn merged_entry(entry: &FileEntry, compression: Compression, write_size: u64) -> FileEntry {
    FileEntry {
        path: entry.path.clone(),
        size: entry.size,
        checksum: entry.checksum,
        is_datafile: entry.is_datafile,
        present: true,
        compressed: compression.is_compressed(),
        stored_pages: entry.n_blocks(),
        write_size,
    }
}
