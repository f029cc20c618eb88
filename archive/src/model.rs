//! Core data types: records, buffer names and per-call diagnostics.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::sstable::Meta;

/// A single write.
///
/// Records are immutable once written. Several records may share a key; the
/// one with the greatest timestamp is the current value. Within a single
/// memtable buffer, records with equal timestamps are ordered by arrival and
/// the later one wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,

    /// Write time, in milliseconds since the Unix epoch.
    #[serde(rename = "ts")]
    pub timestamp_ms: i64,

    /// The opaque payload.
    #[serde(rename = "doc")]
    pub value: Bytes,
}

impl Record {
    pub fn new(key: impl Into<String>, timestamp_ms: i64, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            timestamp_ms,
            value: value.into(),
        }
    }
}

/// One of the two memtable buffers.
///
/// Exactly one is active at any time. The other is the deterministic
/// complement returned by [`BufferName::other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferName {
    Blue,
    Green,
}

impl BufferName {
    /// The buffer that is active after [`Archive::init`](crate::Archive::init).
    pub const INITIAL: BufferName = BufferName::Blue;

    /// Collection name of the buffer in the document store.
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferName::Blue => "blue",
            BufferName::Green => "green",
        }
    }

    pub fn other(&self) -> BufferName {
        match self {
            BufferName::Blue => BufferName::Green,
            BufferName::Green => BufferName::Blue,
        }
    }

    pub fn parse(name: &str) -> Option<BufferName> {
        match name {
            "blue" => Some(BufferName::Blue),
            "green" => Some(BufferName::Green),
            _ => None,
        }
    }
}

impl std::fmt::Display for BufferName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read amplification of a single [`Archive::get`](crate::Archive::get).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetStats {
    /// Location the value was read from: the memtable buffer URL or the
    /// sstable URL. Empty if the key was not found.
    pub source: String,

    /// Number of sstables consulted.
    pub blobs_fetched: usize,

    /// Number of records read across all consulted sstables.
    pub records_scanned: usize,
}

/// Outcome of a single [`Archive::flush`](crate::Archive::flush).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Location of the memtable buffer that was flushed.
    pub flushed_memtable: String,

    /// Location of the memtable buffer that is active after the flush.
    pub active_memtable: String,

    /// URL of the written sstable, or `None` if the buffer was empty.
    pub blob_url: Option<String>,

    /// Metadata of the written sstable, or `None` if the buffer was empty.
    pub meta: Option<Meta>,
}
