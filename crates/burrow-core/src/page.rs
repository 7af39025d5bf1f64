//! Physical file format shared by every backup.
//!
//! A stored file is a sequence of page records:
//!
//! ```text
//! block_no: u32 LE | body_len: u32 LE | body (codec-tagged page)
//! ```
//!
//! Records appear in ascending block order, but readers only rely on each
//! block appearing at most once.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::backup::file::BLOCK_SIZE;
use crate::error::{BurrowError, Result};

pub const RECORD_HEADER_LEN: usize = 8;

/// Upper bound for an encoded body; generous enough for codec overhead on
/// incompressible pages.
const MAX_BODY_LEN: usize = BLOCK_SIZE as usize + 1024;

/// Where a record's body lives inside the stored file.
#[derive(Debug, Clone, Copy)]
struct BodySpan {
    offset: u64,
    len: usize,
}

/// A stored file indexed by its record headers. Bodies stay on disk until
/// [`PageFile::read_body`] asks for one.
#[derive(Debug)]
pub struct PageFile<R = File> {
    label: String,
    reader: R,
    index: BTreeMap<u32, BodySpan>,
}

impl PageFile {
    /// Index the stored file at `path`. Blocks at or beyond `n_blocks` are
    /// rejected.
    pub fn open(path: &Path, n_blocks: u32) -> Result<Self> {
        let file = File::open(path)?;
        Self::scan(&path.display().to_string(), file, n_blocks)
    }
}

impl<R: Read + Seek> PageFile<R> {
    /// Walk the record headers of `reader`, seeking over each body.
    pub fn scan(label: &str, mut reader: R, n_blocks: u32) -> Result<Self> {
        let invalid = |reason: String| BurrowError::InvalidPage {
            path: label.to_string(),
            reason,
        };

        let total = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut index = BTreeMap::new();
        let mut pos = 0u64;
        while pos < total {
            if total - pos < RECORD_HEADER_LEN as u64 {
                return Err(invalid(format!("truncated record header at offset {pos}")));
            }
            let mut header = [0u8; RECORD_HEADER_LEN];
            reader.read_exact(&mut header)?;
            let block_no = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let body_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

            if block_no >= n_blocks {
                return Err(invalid(format!(
                    "block {block_no} beyond end of file ({n_blocks} blocks)"
                )));
            }
            if body_len == 0 || body_len > MAX_BODY_LEN {
                return Err(invalid(format!(
                    "block {block_no} has implausible body length {body_len}"
                )));
            }
            let offset = pos + RECORD_HEADER_LEN as u64;
            let end = offset + body_len as u64;
            if end > total {
                return Err(invalid(format!("block {block_no} body is truncated")));
            }
            let span = BodySpan {
                offset,
                len: body_len,
            };
            if index.insert(block_no, span).is_some() {
                return Err(invalid(format!("block {block_no} stored twice")));
            }
            reader.seek(SeekFrom::Start(end))?;
            pos = end;
        }

        Ok(Self {
            label: label.to_string(),
            reader,
            index,
        })
    }

    /// Encoded body of `block`, if stored.
    pub fn read_body(&mut self, block: u32) -> Result<Option<Vec<u8>>> {
        let Some(span) = self.index.get(&block).copied() else {
            return Ok(None);
        };
        self.reader.seek(SeekFrom::Start(span.offset))?;
        let mut body = vec![0u8; span.len];
        self.reader.read_exact(&mut body).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => BurrowError::InvalidPage {
                path: self.label.clone(),
                reason: format!("block {block} body shrank while reading"),
            },
            _ => BurrowError::Io(e),
        })?;
        Ok(Some(body))
    }

    pub fn blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.index.keys().copied()
    }

    pub fn page_count(&self) -> u32 {
        self.index.len() as u32
    }
}

/// Appends page records to a writer.
pub struct PageWriter<W: Write> {
    inner: W,
    bytes_written: u64,
}

impl<W: Write> PageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
        }
    }

    pub fn write_page(&mut self, block_no: u32, body: &[u8]) -> io::Result<()> {
        let len = u32::try_from(body.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "page body too large"))?;
        self.inner.write_all(&block_no.to_le_bytes())?;
        self.inner.write_all(&len.to_le_bytes())?;
        self.inner.write_all(body)?;
        self.bytes_written += (RECORD_HEADER_LEN + body.len()) as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Split logical file content into pages.
pub fn split_pages(content: &[u8]) -> impl Iterator<Item = (u32, &[u8])> {
    content
        .chunks(BLOCK_SIZE as usize)
        .enumerate()
        .map(|(i, chunk)| (i as u32, chunk))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::compress::{compress, decompress_page, Compression};

    fn encode(records: &[(u32, &[u8])]) -> Vec<u8> {
        let mut w = PageWriter::new(Vec::new());
        for (block, page) in records {
            let body = compress(Compression::None, page).unwrap();
            w.write_page(*block, &body).unwrap();
        }
        w.into_inner()
    }

    fn scan(data: Vec<u8>, n_blocks: u32) -> Result<PageFile<Cursor<Vec<u8>>>> {
        PageFile::scan("t", Cursor::new(data), n_blocks)
    }

    /// Counts the body bytes actually pulled from the underlying reader.
    struct CountingReader<R> {
        inner: R,
        read: u64,
    }

    impl<R: Read> Read for CountingReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.read += n as u64;
            Ok(n)
        }
    }

    impl<R: Seek> Seek for CountingReader<R> {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn record_is_header_plus_body() {
        let page = vec![7u8; BLOCK_SIZE as usize];
        let data = encode(&[(0, &page)]);
        // 8-byte header, 1-byte codec tag, page.
        assert_eq!(data.len(), RECORD_HEADER_LEN + 1 + BLOCK_SIZE as usize);
    }

    #[test]
    fn sparse_records_are_indexed() {
        let data = encode(&[(1, b"one"), (4, b"four")]);
        let mut file = scan(data, 5).unwrap();
        assert_eq!(file.blocks().collect::<Vec<_>>(), vec![1, 4]);
        let body = file.read_body(4).unwrap().unwrap();
        assert_eq!(decompress_page(&body).unwrap(), b"four");
        assert!(file.read_body(0).unwrap().is_none());
    }

    #[test]
    fn indexing_reads_only_headers() {
        let page = vec![3u8; BLOCK_SIZE as usize];
        let records: Vec<(u32, &[u8])> = (0..64).map(|b| (b, page.as_slice())).collect();
        let data = encode(&records);
        let reader = CountingReader {
            inner: Cursor::new(data),
            read: 0,
        };
        let mut file = PageFile::scan("t", reader, 64).unwrap();
        assert_eq!(file.page_count(), 64);
        assert_eq!(file.reader.read, 64 * RECORD_HEADER_LEN as u64);

        let body = file.read_body(63).unwrap().unwrap();
        assert_eq!(decompress_page(&body).unwrap(), page);
        assert_eq!(
            file.reader.read,
            64 * RECORD_HEADER_LEN as u64 + body.len() as u64
        );
    }

    #[test]
    fn opens_stored_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rel");
        std::fs::write(&path, encode(&[(0, b"zero"), (2, b"two")])).unwrap();

        let mut file = PageFile::open(&path, 3).unwrap();
        assert_eq!(file.page_count(), 2);
        let body = file.read_body(2).unwrap().unwrap();
        assert_eq!(decompress_page(&body).unwrap(), b"two");
    }

    #[test]
    fn rejects_block_past_end() {
        let data = encode(&[(3, b"x")]);
        let err = scan(data, 3).unwrap_err();
        assert!(matches!(err, BurrowError::InvalidPage { .. }));
    }

    #[test]
    fn rejects_duplicate_block() {
        let data = encode(&[(0, b"a"), (0, b"b")]);
        assert!(scan(data, 1).is_err());
    }

    #[test]
    fn rejects_truncation() {
        let mut data = encode(&[(0, b"abcdef")]);
        data.truncate(data.len() - 2);
        assert!(matches!(
            scan(data.clone(), 1),
            Err(BurrowError::InvalidPage { .. })
        ));
        data.truncate(5);
        assert!(matches!(scan(data, 1), Err(BurrowError::InvalidPage { .. })));
    }

    #[test]
    fn split_keeps_short_tail() {
        let content = vec![1u8; BLOCK_SIZE as usize + 10];
        let pages: Vec<_> = split_pages(&content).collect();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].1.len(), 10);
    }
}
