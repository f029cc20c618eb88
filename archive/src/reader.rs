//! The read path: active memtable buffer, then sstables newest first.

use std::sync::Arc;

use crate::blobstore::BlobStore;
use crate::config::ReadOptions;
use crate::error::Result;
use crate::memtable::Memtable;
use crate::metadata::MetadataIndex;
use crate::model::{GetStats, Record};

pub(crate) struct Reader {
    memtable: Arc<Memtable>,
    metadata: Arc<MetadataIndex>,
    blobs: Arc<BlobStore>,
}

impl Reader {
    pub(crate) fn new(
        memtable: Arc<Memtable>,
        metadata: Arc<MetadataIndex>,
        blobs: Arc<BlobStore>,
    ) -> Self {
        Self {
            memtable,
            metadata,
            blobs,
        }
    }

    /// Looks `key` up in the active buffer and then in every sstable whose
    /// key range contains it, most recently created first.
    ///
    /// Every sstable consulted adds to the returned stats, hit or miss.
    #[tracing::instrument(level = "debug", skip_all, fields(key = %key))]
    pub(crate) async fn get(
        &self,
        key: &str,
        options: &ReadOptions,
    ) -> Result<(Option<Record>, GetStats)> {
        let mut stats = GetStats::default();

        let (record, location) = self
            .memtable
            .get(key)
            .await
            .map_err(|e| e.context("memtable.get"))?;
        if let Some(record) = record {
            stats.source = location;
            return Ok((Some(record), stats));
        }

        let candidates = self.metadata.containing(key).await?;

        let mut found: Option<Record> = None;
        for meta in &candidates {
            if let Some(best) = &found {
                if !options.verify_recency {
                    break;
                }
                // nothing in this blob is newer than the hit
                if meta.max_time <= best.timestamp_ms {
                    continue;
                }
            }

            let (record, scanned) = self.blobs.find(&meta.location, key).await?;
            stats.blobs_fetched += 1;
            stats.records_scanned += scanned;

            let Some(record) = record else {
                continue;
            };
            let newer = found
                .as_ref()
                .is_none_or(|best| record.timestamp_ms > best.timestamp_ms);
            if newer {
                stats.source = self.blobs.url(&meta.location);
                found = Some(record);
            }
        }

        tracing::debug!(
            hit = found.is_some(),
            blobs_fetched = stats.blobs_fetched,
            records_scanned = stats.records_scanned,
            "read from sstables"
        );
        Ok((found, stats))
    }
}
