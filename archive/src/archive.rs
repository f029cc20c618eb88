//! The archive facade.
//!
//! [`Archive`] is the entry point: it accepts writes into the active
//! memtable buffer, answers point reads across the memtable and the flushed
//! sstables, and moves data from one tier to the other on [`Archive::flush`].

use std::sync::Arc;

use bytes::Bytes;
use common::{
    Clock, DocumentStore, InMemoryDocumentStore, SystemClock, create_object_store,
    object_store_url,
};

use crate::blobstore::BlobStore;
use crate::compactor::{CompactionOptions, CompactionStats, Compactor, NoopCompactor};
use crate::config::{Config, ReadOptions};
use crate::error::{Error, Result};
use crate::flusher::Flusher;
use crate::memtable::Memtable;
use crate::metadata::MetadataIndex;
use crate::model::{FlushStats, GetStats, Record};
use crate::reader::Reader;

/// A tiered key/value archive.
///
/// Writes land in a document-store backed memtable. [`flush`](Archive::flush)
/// swaps the memtable's two buffers and turns the frozen one into an
/// immutable sstable in object storage, indexed by key range.
///
/// Every method takes `&self`; an `Archive` can be shared between tasks
/// behind an [`Arc`]. State lives entirely in the backing stores, so
/// several instances may point at the same stores. A flush lease kept on
/// the memtable pointer document lets only one of them flush at a time.
///
/// Puts are fenced against a concurrent swap only within one instance. A
/// put issued by another instance while this one swaps may land in the
/// buffer being frozen after its drain has read it; that record stays in
/// the buffer until it is reset and is then lost. Route writes through the
/// instance that flushes, or pause writers around a flush.
///
/// # Example
///
/// ```ignore
/// use archive::{Archive, Config};
///
/// let archive = Archive::builder(Config::default()).build()?;
/// archive.init().await?;
///
/// archive.put("001", "hello").await?;
/// archive.flush().await?;
///
/// let (record, stats) = archive.get("001").await?;
/// assert_eq!(stats.blobs_fetched, 1);
/// ```
pub struct Archive {
    memtable: Arc<Memtable>,
    metadata: Arc<MetadataIndex>,
    blobs: Arc<BlobStore>,
    reader: Reader,
    flusher: Flusher,
    compactor: Arc<dyn Compactor>,
}

impl Archive {
    /// Creates a builder for an archive with the given configuration.
    pub fn builder(config: Config) -> ArchiveBuilder {
        ArchiveBuilder::new(config)
    }

    /// Checks that both backing stores are reachable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] naming the store that failed.
    pub async fn ping(&self) -> Result<()> {
        self.memtable
            .ping()
            .await
            .map_err(|e| e.context("memtable.ping"))?;
        self.blobs.ping().await
    }

    /// Provisions a fresh archive: the active-buffer pointer, both memtable
    /// buffers and the sstable metadata index.
    ///
    /// Run once per set of backing stores.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if any of the collections already exists.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn init(&self) -> Result<()> {
        self.memtable
            .init()
            .await
            .map_err(|e| e.context("memtable.init"))?;
        self.metadata.init().await?;
        tracing::info!(metadata = %self.metadata.location(), "initialized archive");
        Ok(())
    }

    /// Writes `value` under `key`.
    ///
    /// The record is stamped with the current time and appended to the
    /// active memtable buffer. Writing a key again does not replace the
    /// older record; reads return the newest one.
    ///
    /// Returns the location of the buffer the record was written to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the document store fails, or
    /// [`Error::Internal`] if the active-buffer pointer is corrupt.
    pub async fn put(&self, key: &str, value: impl Into<Bytes>) -> Result<String> {
        self.memtable
            .put(key, value.into())
            .await
            .map_err(|e| e.context("memtable.put"))
    }

    /// Returns the newest record for `key`, and what it cost to find it.
    ///
    /// The active memtable buffer is consulted first, then every sstable
    /// whose key range contains `key`, most recently created first. The
    /// first hit is returned.
    ///
    /// Records that sit in a frozen buffer, between a swap and the end of
    /// the flush that persists them, are not visible.
    ///
    /// This method uses default read options. Use
    /// [`get_with_options`](Archive::get_with_options) to verify hits
    /// against older sstables.
    pub async fn get(&self, key: &str) -> Result<(Option<Record>, GetStats)> {
        self.get_with_options(key, &ReadOptions::default()).await
    }

    /// Like [`get`](Archive::get), with custom read options.
    pub async fn get_with_options(
        &self,
        key: &str,
        options: &ReadOptions,
    ) -> Result<(Option<Record>, GetStats)> {
        self.reader.get(key, options).await
    }

    /// Moves the active memtable buffer into a new sstable.
    ///
    /// The buffers are swapped first, so writes continue into the other
    /// buffer while the frozen one is drained. On success the frozen buffer
    /// is emptied. If it held no records, no sstable is written and the
    /// returned stats carry no blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FlushInProgress`] if another flush on this archive,
    /// or on any instance sharing its document store, has not finished. Any other failure leaves the frozen buffer's
    /// records in place; a later flush persists them.
    pub async fn flush(&self) -> Result<FlushStats> {
        self.flusher.flush().await
    }

    /// Runs one pass of the configured [`Compactor`].
    pub async fn compact(&self, options: CompactionOptions) -> Result<Vec<CompactionStats>> {
        self.compactor.run(options).await
    }
}

/// Builder for [`Archive`].
///
/// Combines the serializable [`Config`] with runtime collaborators that
/// cannot be expressed in configuration.
pub struct ArchiveBuilder {
    config: Config,
    document_store: Option<Arc<dyn DocumentStore>>,
    clock: Arc<dyn Clock>,
    compactor: Arc<dyn Compactor>,
}

impl ArchiveBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            document_store: None,
            clock: Arc::new(SystemClock),
            compactor: Arc::new(NoopCompactor),
        }
    }

    /// Sets the document store holding the memtable and metadata index.
    ///
    /// Defaults to a new in-memory store named after
    /// [`Config::database`].
    pub fn with_document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.document_store = Some(store);
        self
    }

    /// Sets the time source used to stamp records and name sstables.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_compactor(mut self, compactor: Arc<dyn Compactor>) -> Self {
        self.compactor = compactor;
        self
    }

    /// Builds the archive.
    ///
    /// Nothing is provisioned; call [`Archive::init`] on fresh stores.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unusable configuration and
    /// [`Error::Storage`] if the object store cannot be created.
    pub fn build(self) -> Result<Archive> {
        if self.config.flush_channel_capacity == 0 {
            return Err(Error::InvalidInput(
                "flush_channel_capacity must be at least 1".to_string(),
            ));
        }

        let document_store: Arc<dyn DocumentStore> = match self.document_store {
            Some(store) => store,
            None => Arc::new(InMemoryDocumentStore::new(
                "memory://localhost",
                self.config.database.clone(),
            )),
        };
        let object_store = create_object_store(&self.config.object_store)?;

        let memtable = Arc::new(Memtable::new(document_store.clone(), self.clock.clone()));
        let metadata = Arc::new(MetadataIndex::new(document_store));
        let blobs = Arc::new(BlobStore::new(
            object_store,
            object_store_url(&self.config.object_store),
            self.clock,
        ));

        Ok(Archive {
            reader: Reader::new(memtable.clone(), metadata.clone(), blobs.clone()),
            flusher: Flusher::new(
                memtable.clone(),
                blobs.clone(),
                metadata.clone(),
                self.config.flush_channel_capacity,
                self.config.flush_lease_timeout_ms,
            ),
            memtable,
            metadata,
            blobs,
            compactor: self.compactor,
        })
    }
}
