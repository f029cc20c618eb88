//! Configuration for the archive and its read path.

use common::ObjectStoreConfig;
use serde::{Deserialize, Serialize};

/// Serializable archive configuration.
///
/// Runtime pieces that cannot be serialized (the document store instance,
/// the clock, the compactor) are supplied through
/// [`ArchiveBuilder`](crate::ArchiveBuilder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database name used when the archive creates its own in-memory
    /// document store. Ignored when a store is supplied to the builder.
    pub database: String,

    /// Where flushed sstables are written.
    pub object_store: ObjectStoreConfig,

    /// Capacity of the hand-off channel between the memtable drain and the
    /// sstable writer during a flush.
    ///
    /// Once this many records are in flight the drain waits for the writer
    /// to catch up.
    ///
    /// The writer collects every record it receives into memory so it can
    /// sort them before encoding, so this bounds the channel only. Memory
    /// use during a flush still grows with the size of the frozen buffer.
    pub flush_channel_capacity: usize,

    /// How long a flush lease may be held before another process may take
    /// it over, in milliseconds.
    ///
    /// Only matters when a process dies mid-flush. Set it well above the
    /// longest expected flush.
    pub flush_lease_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "archive".to_string(),
            object_store: ObjectStoreConfig::InMemory,
            flush_channel_capacity: 64,
            flush_lease_timeout_ms: 600_000,
        }
    }
}

/// Options for point reads.
///
/// Controls the behavior of
/// [`Archive::get_with_options`](crate::Archive::get_with_options).
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Whether to double-check a hit against older sstables.
    ///
    /// When `false` (the default), the first sstable containing the key, in
    /// newest-created-first order, wins. That is only correct while sstable
    /// creation order tracks record recency, which an irregular compaction
    /// can break.
    ///
    /// When `true`, after a hit the read keeps consulting the remaining
    /// candidates whose `max_time` is newer than the hit's timestamp and
    /// returns the record with the greatest timestamp. Every extra sstable
    /// consulted is counted in [`GetStats`](crate::GetStats).
    pub verify_recency: bool,
}
