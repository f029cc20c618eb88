//! Sstable blobs in object storage.
//!
//! [`BlobStore`] is the consumer half of a flush: it receives the drained
//! records over a channel, writes them as one immutable blob and describes
//! the result with a [`Meta`]. It also serves point lookups inside a blob
//! for the read path.

use std::sync::Arc;

use bytes::BytesMut;
use common::Clock;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::model::Record;
use crate::sstable::encoding::{RecordIter, encode_header, encode_record};
use crate::sstable::{Meta, MetaBuilder, blob_name};

/// Writes and scans sstable blobs.
pub struct BlobStore {
    store: Arc<dyn ObjectStore>,
    url_prefix: String,
    clock: Arc<dyn Clock>,
}

impl BlobStore {
    /// `url_prefix` is prepended to blob names to form the locations
    /// reported to callers; see [`common::object_store_url`].
    pub fn new(store: Arc<dyn ObjectStore>, url_prefix: String, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            url_prefix,
            clock,
        }
    }

    /// Informational URL of a blob.
    pub fn url(&self, location: &str) -> String {
        format!("{}/{}", self.url_prefix, location)
    }

    pub async fn ping(&self) -> Result<()> {
        self.store
            .list_with_delimiter(None)
            .await
            .map_err(|e| Error::from(e).context("blobstore.ping"))?;
        Ok(())
    }

    /// Consumes `rx` until it closes and writes the records as one blob.
    ///
    /// Records are stored sorted by key and, within a key, newest first.
    /// Records with equal key and timestamp keep the later arrival first.
    ///
    /// Returns `None` without writing anything if the channel delivered no
    /// records. An error item received from the channel aborts the write
    /// and is returned as is.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn write(&self, mut rx: mpsc::Receiver<Result<Record>>) -> Result<Option<Meta>> {
        let mut records = Vec::new();
        let mut builder = MetaBuilder::new();
        while let Some(item) = rx.recv().await {
            let record = item?;
            builder.observe(&record);
            records.push(record);
        }
        if records.is_empty() {
            tracing::debug!("nothing to flush");
            return Ok(None);
        }

        records.reverse();
        records.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then_with(|| b.timestamp_ms.cmp(&a.timestamp_ms))
        });

        let mut buf = BytesMut::new();
        encode_header(&mut buf);
        for record in &records {
            encode_record(record, &mut buf)?;
        }
        builder.add_size(buf.len());

        let created = self.clock.now_millis();
        let name = blob_name(created);
        let opts = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };
        self.store
            .put_opts(&Path::from(name.as_str()), PutPayload::from(buf.freeze()), opts)
            .await
            .map_err(|e| match e {
                object_store::Error::AlreadyExists { .. } => {
                    Error::Conflict(format!("sstable {} already exists", name))
                }
                other => Error::from(other).context("put sstable"),
            })?;

        let meta = builder.finish(created, name).ok_or_else(|| {
            Error::Internal("sstable metadata missing for non-empty blob".to_string())
        })?;
        tracing::debug!(location = %meta.location, count = meta.count, size = meta.size, "wrote sstable");
        Ok(Some(meta))
    }

    /// Scans the blob at `location` for `key`.
    ///
    /// Returns the first matching record in stored order, which is the
    /// newest version the blob holds, and the number of records read to
    /// get there. A miss reads the whole blob.
    #[tracing::instrument(level = "trace", skip_all, fields(location = %location, key = %key))]
    pub async fn find(&self, location: &str, key: &str) -> Result<(Option<Record>, usize)> {
        let blob = self
            .store
            .get(&Path::from(location))
            .await
            .map_err(|e| Error::from(e).context("blobstore.find"))?
            .bytes()
            .await
            .map_err(|e| Error::from(e).context("blobstore.find"))?;

        let mut scanned = 0;
        for item in RecordIter::new(blob)? {
            let record = item?;
            scanned += 1;
            if record.key == key {
                return Ok((Some(record), scanned));
            }
        }
        Ok((None, scanned))
    }
}
