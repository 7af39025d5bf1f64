use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backup::file::BLOCK_SIZE;
use crate::error::{BurrowError, Result};

pub const TAG_NONE: u8 = 0x00;
pub const TAG_LZ4: u8 = 0x01;
pub const TAG_ZSTD: u8 = 0x02;

/// Page codec. Stored page bodies carry a one-byte tag naming the codec, so a
/// reader never needs the owning backup's setting to decode them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Compression {
    #[default]
    None,
    Lz4,
    Zstd {
        level: i32,
    },
}

impl Compression {
    pub fn tag(self) -> u8 {
        match self {
            Compression::None => TAG_NONE,
            Compression::Lz4 => TAG_LZ4,
            Compression::Zstd { .. } => TAG_ZSTD,
        }
    }

    pub fn is_compressed(self) -> bool {
        !matches!(self, Compression::None)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => f.write_str("none"),
            Compression::Lz4 => f.write_str("lz4"),
            Compression::Zstd { level } => write!(f, "zstd:{level}"),
        }
    }
}

impl FromStr for Compression {
    type Err = BurrowError;

    /// Accepts `none`, `lz4`, `zstd` (level 3) and `zstd:<level>`.
    fn from_str(s: &str) -> Result<Self> {
        let (algo, level) = match s.split_once(':') {
            Some((a, l)) => (a, Some(l)),
            None => (s, None),
        };
        match (algo, level) {
            ("none", None) => Ok(Compression::None),
            ("lz4", None) => Ok(Compression::Lz4),
            ("zstd", None) => Ok(Compression::Zstd { level: 3 }),
            ("zstd", Some(l)) => {
                let level = l.parse::<i32>().map_err(|_| {
                    BurrowError::Config(format!("invalid zstd level: '{l}'"))
                })?;
                Ok(Compression::Zstd { level })
            }
            _ => Err(BurrowError::Config(format!(
                "unknown compression algorithm: {s}"
            ))),
        }
    }
}

impl TryFrom<String> for Compression {
    type Error = BurrowError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Compression> for String {
    fn from(value: Compression) -> Self {
        value.to_string()
    }
}

/// Compress data and prepend a 1-byte tag identifying the codec.
pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        Compression::None => {
            let mut out = Vec::with_capacity(1 + data.len());
            out.push(TAG_NONE);
            out.extend_from_slice(data);
            Ok(out)
        }
        Compression::Lz4 => {
            let compressed = lz4_flex::compress_prepend_size(data);
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(TAG_LZ4);
            out.extend_from_slice(&compressed);
            Ok(out)
        }
        Compression::Zstd { level } => {
            use std::cell::RefCell;
            thread_local! {
                static ZSTD_CX: RefCell<Option<(i32, zstd::bulk::Compressor<'static>)>> =
                    const { RefCell::new(None) };
            }

            ZSTD_CX.with(|cell| {
                let mut slot = cell.borrow_mut();
                if !matches!(slot.as_ref(), Some((l, _)) if *l == level) {
                    let cx = zstd::bulk::Compressor::new(level)
                        .map_err(|e| BurrowError::Other(format!("zstd init: {e}")))?;
                    *slot = Some((level, cx));
                }
                let Some((_, cx)) = slot.as_mut() else {
                    return Err(BurrowError::Other("zstd compressor unavailable".into()));
                };
                let compressed = cx
                    .compress(data)
                    .map_err(|e| BurrowError::Other(format!("zstd compress: {e}")))?;
                let mut out = Vec::with_capacity(1 + compressed.len());
                out.push(TAG_ZSTD);
                out.extend_from_slice(&compressed);
                Ok(out)
            })
        }
    }
}

/// Decode a tagged page body. Output larger than one page is rejected.
pub fn decompress_page(data: &[u8]) -> Result<Vec<u8>> {
    let limit = BLOCK_SIZE;
    let (&tag, payload) = data
        .split_first()
        .ok_or_else(|| BurrowError::Decompression("empty data".into()))?;
    let page = match tag {
        TAG_NONE => payload.to_vec(),
        TAG_LZ4 => {
            let prefix: [u8; 4] = payload
                .get(..4)
                .and_then(|p| p.try_into().ok())
                .ok_or_else(|| BurrowError::Decompression("lz4: payload too short".into()))?;
            let declared = u64::from(u32::from_le_bytes(prefix));
            if declared > limit {
                return Err(BurrowError::Decompression(format!(
                    "lz4: decompressed size ({declared}) exceeds page size"
                )));
            }
            lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| BurrowError::Decompression(format!("lz4: {e}")))?
        }
        TAG_ZSTD => {
            let mut decoder = zstd::stream::Decoder::new(std::io::Cursor::new(payload))
                .map_err(|e| BurrowError::Decompression(format!("zstd init: {e}")))?;
            let mut output = Vec::with_capacity(limit as usize);
            decoder
                .by_ref()
                .take(limit + 1)
                .read_to_end(&mut output)
                .map_err(|e| BurrowError::Decompression(format!("zstd: {e}")))?;
            output
        }
        _ => return Err(BurrowError::UnknownCompressionTag(tag)),
    };
    if page.len() as u64 > limit {
        return Err(BurrowError::Decompression(format!(
            "decompressed page of {} bytes exceeds page size",
            page.len()
        )));
    }
    Ok(page)
}

/// Codec tag of an encoded body, if any.
pub fn body_tag(data: &[u8]) -> Option<u8> {
    data.first().copied()
}
