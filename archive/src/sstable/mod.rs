//! Sstables: immutable, flushed runs of records.
//!
//! An sstable is written once, from a drained memtable buffer, and described
//! by a [`Meta`] that the metadata index records. Records inside a blob are
//! sorted by key ascending and, within a key, newest first, so a front to
//! back scan meets the current version of a key before older ones.

pub mod encoding;

use serde::{Deserialize, Serialize};

use crate::model::Record;

/// File extension of sstable blobs.
pub const EXTENSION: &str = "sstable";

/// Returns the blob name of an sstable created at `created_ms`.
pub fn blob_name(created_ms: i64) -> String {
    format!("{}.{}", created_ms, EXTENSION)
}

/// Range metadata of one sstable.
///
/// Invariants: `min_key <= max_key`, `min_time <= max_time`, `count >= 1`.
/// Immutable once committed to the metadata index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub min_key: String,
    pub max_key: String,

    /// Oldest record timestamp, in milliseconds since the epoch.
    pub min_time: i64,

    /// Newest record timestamp, in milliseconds since the epoch.
    pub max_time: i64,

    /// Number of records.
    pub count: u64,

    /// Encoded size of the blob in bytes.
    pub size: u64,

    /// Flush time, in milliseconds since the epoch.
    pub created: i64,

    /// Blob name within the object store.
    pub location: String,
}

/// Accumulates [`Meta`] while records stream past.
///
/// Records may arrive in any order.
#[derive(Debug, Default)]
pub struct MetaBuilder {
    min_key: Option<String>,
    max_key: Option<String>,
    min_time: i64,
    max_time: i64,
    count: u64,
    size: u64,
}

impl MetaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one record into the running range.
    pub fn observe(&mut self, record: &Record) {
        if self.count == 0 {
            self.min_key = Some(record.key.clone());
            self.max_key = Some(record.key.clone());
            self.min_time = record.timestamp_ms;
            self.max_time = record.timestamp_ms;
        } else {
            if self.min_key.as_deref().is_some_and(|k| record.key.as_str() < k) {
                self.min_key = Some(record.key.clone());
            }
            if self.max_key.as_deref().is_some_and(|k| record.key.as_str() > k) {
                self.max_key = Some(record.key.clone());
            }
            self.min_time = self.min_time.min(record.timestamp_ms);
            self.max_time = self.max_time.max(record.timestamp_ms);
        }
        self.count += 1;
    }

    /// Adds encoded bytes to the size total.
    pub fn add_size(&mut self, bytes: usize) {
        self.size += bytes as u64;
    }

    /// Produces the metadata, or `None` if no record was observed.
    pub fn finish(self, created: i64, location: String) -> Option<Meta> {
        Some(Meta {
            min_key: self.min_key?,
            max_key: self.max_key?,
            min_time: self.min_time,
            max_time: self.max_time,
            count: self.count,
            size: self.size,
            created,
            location,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn should_track_ranges_regardless_of_arrival_order() {
        // given
        let mut builder = MetaBuilder::new();

        // when
        for (key, ts) in [("005", 50), ("001", 70), ("010", 10)] {
            builder.observe(&Record::new(key, ts, Bytes::from("v")));
        }
        builder.add_size(123);
        let meta = builder.finish(99, blob_name(99)).unwrap();

        // then
        assert_eq!(
            meta,
            Meta {
                min_key: "001".to_string(),
                max_key: "010".to_string(),
                min_time: 10,
                max_time: 70,
                count: 3,
                size: 123,
                created: 99,
                location: "99.sstable".to_string(),
            }
        );
    }

    #[test]
    fn should_refuse_to_describe_empty_sstable() {
        assert!(MetaBuilder::new().finish(1, blob_name(1)).is_none());
    }
}
