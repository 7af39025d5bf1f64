use std::fmt;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

type Blake2b256 = Blake2b<U32>;

/// BLAKE2b-256 digest of a file's logical content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum(pub [u8; 32]);

impl Checksum {
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finish().checksum
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Checksum(arr))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", &self.to_hex()[..12])
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Checksum::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid checksum: '{s}'")))
    }
}

/// Identity of a file's content: two files with equal digests are the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDigest {
    pub checksum: Checksum,
    pub size: u64,
}

/// Streaming hasher fed page by page while a file is rebuilt.
pub struct ContentHasher {
    inner: Blake2b256,
    size: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            inner: Blake2b256::new(),
            size: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.inner, data);
        self.size += data.len() as u64;
    }

    pub fn finish(self) -> FileDigest {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.inner.finalize());
        FileDigest {
            checksum: Checksum(out),
            size: self.size,
        }
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}
