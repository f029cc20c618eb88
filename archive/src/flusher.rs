//! The flush pipeline: memtable buffer to sstable.
//!
//! ```text
//!   swap ──► drain(frozen) ──mpsc──► BlobStore::write ──► MetadataIndex::insert ──► reset(frozen)
//! ```
//!
//! The drain and the blob write run concurrently and are joined with
//! first-error semantics. The frozen buffer is only reset after its sstable
//! is committed to the metadata index, so any failure before that leaves
//! the records in the buffer.
//!
//! Two guards keep flushes from overlapping. An in-process flag rejects a
//! second flush on the same [`Flusher`] without touching the store, and the
//! flush lease on the memtable pointer document rejects flushes from other
//! processes sharing the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use crate::blobstore::BlobStore;
use crate::error::{Error, Result};
use crate::memtable::Memtable;
use crate::metadata::MetadataIndex;
use crate::model::FlushStats;

static NEXT_FLUSHER: AtomicU64 = AtomicU64::new(0);

/// Names a flusher uniquely enough to tell lease holders apart.
fn owner_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "{}-{}-{}",
        std::process::id(),
        nanos,
        NEXT_FLUSHER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Runs flushes, at most one at a time.
pub(crate) struct Flusher {
    memtable: Arc<Memtable>,
    blobs: Arc<BlobStore>,
    metadata: Arc<MetadataIndex>,
    channel_capacity: usize,
    lease_timeout_ms: i64,
    owner: String,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the flush ends, including when its
/// future is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Flusher {
    pub(crate) fn new(
        memtable: Arc<Memtable>,
        blobs: Arc<BlobStore>,
        metadata: Arc<MetadataIndex>,
        channel_capacity: usize,
        lease_timeout_ms: u64,
    ) -> Self {
        Self {
            memtable,
            blobs,
            metadata,
            channel_capacity: channel_capacity.max(1),
            lease_timeout_ms: i64::try_from(lease_timeout_ms).unwrap_or(i64::MAX),
            owner: owner_id(),
            in_flight: AtomicBool::new(false),
        }
    }

    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(InFlightGuard(&self.in_flight))
        }
    }

    /// Swaps the memtable and persists the frozen buffer as an sstable.
    ///
    /// An empty frozen buffer produces no sstable; the swap still stands.
    #[tracing::instrument(level = "debug", skip_all, fields(owner = %self.owner))]
    pub(crate) async fn flush(&self) -> Result<FlushStats> {
        let Some(_guard) = self.try_begin() else {
            tracing::warn!("rejecting flush: another flush is in progress");
            return Err(Error::FlushInProgress);
        };

        let lease = match self
            .memtable
            .acquire_flush_lease(&self.owner, self.lease_timeout_ms)
            .await
        {
            Ok(lease) => lease,
            Err(Error::FlushInProgress) => {
                tracing::warn!("rejecting flush: flush lease is held elsewhere");
                return Err(Error::FlushInProgress);
            }
            Err(e) => return Err(e.context("memtable.acquire_flush_lease")),
        };

        let result = self.flush_frozen().await;
        lease.release().await;
        result
    }

    async fn flush_frozen(&self) -> Result<FlushStats> {
        let (frozen, active_memtable) = self
            .memtable
            .swap()
            .await
            .map_err(|e| e.context("memtable.swap"))?;
        let mut stats = FlushStats {
            flushed_memtable: frozen.location(),
            active_memtable,
            ..Default::default()
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let (drained, meta) = tokio::try_join!(
            async {
                frozen
                    .drain(tx)
                    .await
                    .map_err(|e| e.context("memtable.drain"))
            },
            async {
                self.blobs
                    .write(rx)
                    .await
                    .map_err(|e| e.context("blobstore.write"))
            },
        )?;

        let Some(meta) = meta else {
            tracing::info!(memtable = %frozen.name(), "flushed empty memtable");
            return Ok(stats);
        };
        let blob_url = self.blobs.url(&meta.location);

        if let Err(e) = self.metadata.insert(&meta).await {
            tracing::error!(
                blob = %blob_url,
                memtable = %frozen.name(),
                error = %e,
                "sstable written but metadata commit failed; blob is orphaned"
            );
            return Err(e);
        }

        frozen
            .reset()
            .await
            .map_err(|e| e.context("memtable.reset"))?;

        tracing::info!(
            memtable = %frozen.name(),
            records = drained,
            blob = %blob_url,
            size = meta.size,
            "flushed memtable"
        );
        stats.blob_url = Some(blob_url);
        stats.meta = Some(meta);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use common::{
        Clock, Document, DocumentStore, Filter, FindOptions, InMemoryDocumentStore, MockClock,
        SortOrder, StorageError, StorageResult,
    };
    use futures::stream::BoxStream;
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use object_store::{ObjectStore, PutPayload};
    use serde_json::Value;
    use std::time::Duration;

    use super::*;
    use crate::metadata::SSTABLES_COLLECTION;
    use crate::model::BufferName;

    /// Delegates to an in-memory store, optionally failing selected calls.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryDocumentStore,
        fail_scans_of: std::sync::Mutex<Option<String>>,
        held_scans_of: std::sync::Mutex<Option<String>>,
        scan_gate: tokio::sync::Notify,
        fail_metadata_commit: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        fn location(&self, collection: &str) -> String {
            self.inner.location(collection)
        }
        async fn ping(&self) -> StorageResult<()> {
            self.inner.ping().await
        }
        async fn create_collection(&self, name: &str) -> StorageResult<()> {
            self.inner.create_collection(name).await
        }
        async fn drop_collection(&self, name: &str) -> StorageResult<()> {
            self.inner.drop_collection(name).await
        }
        async fn create_index(&self, c: &str, keys: &[(&str, SortOrder)]) -> StorageResult<()> {
            self.inner.create_index(c, keys).await
        }
        async fn insert_one(&self, collection: &str, doc: Document) -> StorageResult<()> {
            if collection == SSTABLES_COLLECTION && self.fail_metadata_commit.load(Ordering::SeqCst)
            {
                return Err(StorageError::Storage("write concern timeout".to_string()));
            }
            self.inner.insert_one(collection, doc).await
        }
        async fn find(
            &self,
            collection: &str,
            filter: &Filter,
            options: FindOptions,
        ) -> StorageResult<BoxStream<'static, StorageResult<Document>>> {
            // point reads carry a limit; drains never do
            let failing = self.fail_scans_of.lock().unwrap().clone();
            if failing.as_deref() == Some(collection) && options.limit.is_none() {
                return Err(StorageError::Storage("cursor killed".to_string()));
            }
            let held = self.held_scans_of.lock().unwrap().clone();
            if held.as_deref() == Some(collection) && options.limit.is_none() {
                self.scan_gate.notified().await;
            }
            self.inner.find(collection, filter, options).await
        }
        async fn compare_and_swap(
            &self,
            collection: &str,
            id: &str,
            field: &str,
            expected: &Value,
            new: Value,
        ) -> StorageResult<bool> {
            self.inner
                .compare_and_swap(collection, id, field, expected, new)
                .await
        }
    }

    const LEASE_TIMEOUT_MS: u64 = 60_000;

    struct Fixture {
        store: Arc<FlakyStore>,
        objects: Arc<InMemory>,
        clock: Arc<MockClock>,
        memtable: Arc<Memtable>,
        metadata: Arc<MetadataIndex>,
        flusher: Flusher,
    }

    async fn create_fixture() -> Fixture {
        let store = Arc::new(FlakyStore::default());
        let objects = Arc::new(InMemory::new());
        let clock = Arc::new(MockClock::at_millis(1_000));
        let memtable = Arc::new(Memtable::new(store.clone(), clock.clone()));
        let metadata = Arc::new(MetadataIndex::new(store.clone()));
        memtable.init().await.unwrap();
        metadata.init().await.unwrap();
        let blobs = Arc::new(BlobStore::new(
            objects.clone(),
            "memory://sstables".to_string(),
            clock.clone(),
        ));
        let flusher = Flusher::new(
            memtable.clone(),
            blobs,
            metadata.clone(),
            2,
            LEASE_TIMEOUT_MS,
        );
        Fixture {
            store,
            objects,
            clock,
            memtable,
            metadata,
            flusher,
        }
    }

    /// A second archive process sharing the fixture's stores and clock.
    fn create_peer(f: &Fixture) -> (Arc<Memtable>, Flusher) {
        let memtable = Arc::new(Memtable::new(f.store.clone(), f.clock.clone()));
        let blobs = Arc::new(BlobStore::new(
            f.objects.clone(),
            "memory://sstables".to_string(),
            f.clock.clone(),
        ));
        let metadata = Arc::new(MetadataIndex::new(f.store.clone()));
        let flusher = Flusher::new(memtable.clone(), blobs, metadata, 2, LEASE_TIMEOUT_MS);
        (memtable, flusher)
    }

    async fn put_keys(f: &Fixture, keys: &[&str]) {
        for key in keys {
            f.clock.advance(Duration::from_millis(15));
            f.memtable.put(key, Bytes::from(key.repeat(3))).await.unwrap();
        }
    }

    #[tokio::test]
    async fn should_persist_frozen_buffer_and_reset_it() {
        // given
        let f = create_fixture().await;
        put_keys(&f, &["b", "a", "c"]).await;

        // when
        let stats = f.flusher.flush().await.unwrap();

        // then
        let meta = stats.meta.unwrap();
        assert_eq!(stats.flushed_memtable, "memory://localhost/archive/blue");
        assert_eq!(stats.active_memtable, "memory://localhost/archive/green");
        assert_eq!(stats.blob_url.unwrap(), "memory://sstables/1045.sstable");
        assert_eq!((meta.min_key.as_str(), meta.max_key.as_str()), ("a", "c"));
        assert_eq!(meta.count, 3);
        assert_eq!(f.store.inner.len("blue"), Some(0));
        assert_eq!(f.metadata.containing("b").await.unwrap(), vec![meta]);
    }

    #[tokio::test]
    async fn should_swap_but_write_nothing_for_empty_buffer() {
        // given
        let f = create_fixture().await;

        // when
        let stats = f.flusher.flush().await.unwrap();

        // then
        assert_eq!(stats.blob_url, None);
        assert_eq!(stats.meta, None);
        assert_eq!(f.memtable.active().await.unwrap(), BufferName::Green);
        assert!(f.objects.list_with_delimiter(None).await.unwrap().objects.is_empty());
    }

    #[tokio::test]
    async fn should_keep_frozen_buffer_when_drain_fails() {
        // given
        let f = create_fixture().await;
        put_keys(&f, &["a", "b"]).await;
        *f.store.fail_scans_of.lock().unwrap() = Some("blue".to_string());

        // when
        let result = f.flusher.flush().await;

        // then
        assert!(matches!(result, Err(Error::Storage(msg)) if msg.starts_with("memtable.drain")));
        assert_eq!(f.store.inner.len("blue"), Some(2));
        assert!(f.metadata.containing("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_keep_frozen_buffer_when_blob_write_fails() {
        // given
        let f = create_fixture().await;
        put_keys(&f, &["a"]).await;
        let taken = Path::from(format!("{}.sstable", f.clock.now_millis()));
        f.objects
            .put(&taken, PutPayload::from(Bytes::from("occupied")))
            .await
            .unwrap();

        // when
        let result = f.flusher.flush().await;

        // then
        assert!(matches!(result, Err(Error::Conflict(msg)) if msg.starts_with("blobstore.write")));
        assert_eq!(f.store.inner.len("blue"), Some(1));
        assert!(f.metadata.containing("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_keep_frozen_buffer_when_metadata_commit_fails() {
        // given
        let f = create_fixture().await;
        put_keys(&f, &["a"]).await;
        f.store.fail_metadata_commit.store(true, Ordering::SeqCst);

        // when
        let result = f.flusher.flush().await;

        // then
        assert!(matches!(result, Err(Error::Storage(msg)) if msg.starts_with("metadata.insert")));
        assert_eq!(f.store.inner.len("blue"), Some(1));
        // the orphaned blob stays behind
        let listed = f.objects.list_with_delimiter(None).await.unwrap();
        assert_eq!(listed.objects.len(), 1);
    }

    #[tokio::test]
    async fn should_flush_records_of_failed_flush_on_a_later_flush() {
        // given
        let f = create_fixture().await;
        put_keys(&f, &["a", "b"]).await;
        *f.store.fail_scans_of.lock().unwrap() = Some("blue".to_string());
        f.flusher.flush().await.unwrap_err();
        *f.store.fail_scans_of.lock().unwrap() = None;

        // when: blue becomes active again, then is frozen by the next swap
        let green = f.flusher.flush().await.unwrap();
        put_keys(&f, &["c"]).await;
        let blue = f.flusher.flush().await.unwrap();

        // then
        assert!(green.meta.is_none());
        let meta = blue.meta.unwrap();
        assert_eq!(meta.count, 3);
        assert_eq!((meta.min_key.as_str(), meta.max_key.as_str()), ("a", "c"));
    }

    #[tokio::test]
    async fn should_reject_overlapping_flush() {
        // given
        let f = create_fixture().await;
        let _held = f.flusher.try_begin().unwrap();

        // when
        let result = f.flusher.flush().await;

        // then
        assert_eq!(result, Err(Error::FlushInProgress));
        assert_eq!(f.memtable.active().await.unwrap(), BufferName::Blue);
    }

    #[tokio::test]
    async fn should_release_guard_after_failed_flush() {
        // given
        let f = create_fixture().await;
        put_keys(&f, &["a"]).await;
        f.store.fail_metadata_commit.store(true, Ordering::SeqCst);
        f.flusher.flush().await.unwrap_err();
        f.store.fail_metadata_commit.store(false, Ordering::SeqCst);

        // when
        let result = f.flusher.flush().await;

        // then
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn should_reject_flush_from_peer_while_flush_is_running() {
        // given
        let f = create_fixture().await;
        let (peer_memtable, peer) = create_peer(&f);
        put_keys(&f, &["k1"]).await;
        *f.store.held_scans_of.lock().unwrap() = Some("blue".to_string());
        let first = f.flusher.flush();
        tokio::pin!(first);
        let paused = tokio::time::timeout(Duration::from_millis(50), &mut first).await;
        assert!(paused.is_err());

        // when
        let rejected = peer.flush().await;
        f.clock.advance(Duration::from_millis(15));
        let location = peer_memtable.put("k2", Bytes::from("v")).await.unwrap();
        *f.store.held_scans_of.lock().unwrap() = None;
        f.store.scan_gate.notify_one();
        let first = first.await.unwrap();
        f.clock.advance(Duration::from_millis(15));
        let second = peer.flush().await.unwrap();

        // then
        assert_eq!(rejected, Err(Error::FlushInProgress));
        assert_eq!(location, "memory://localhost/archive/green");
        let meta = first.meta.unwrap();
        assert_eq!((meta.min_key.as_str(), meta.count), ("k1", 1));
        let meta = second.meta.unwrap();
        assert_eq!((meta.min_key.as_str(), meta.count), ("k2", 1));
        assert_eq!(f.store.inner.len("blue"), Some(0));
        assert_eq!(f.store.inner.len("green"), Some(0));
    }

    #[tokio::test]
    async fn should_take_over_flush_lease_of_crashed_process() {
        // given
        let f = create_fixture().await;
        put_keys(&f, &["a"]).await;
        let crashed = f
            .memtable
            .acquire_flush_lease("crashed", LEASE_TIMEOUT_MS as i64)
            .await
            .unwrap();
        std::mem::forget(crashed);
        assert_eq!(f.flusher.flush().await, Err(Error::FlushInProgress));
        assert_eq!(f.memtable.active().await.unwrap(), BufferName::Blue);

        // when
        f.clock.advance(Duration::from_millis(LEASE_TIMEOUT_MS));
        let stats = f.flusher.flush().await.unwrap();

        // then
        assert_eq!(stats.meta.unwrap().count, 1);
    }

    #[tokio::test]
    async fn should_recover_after_cancelled_flush() {
        // given
        let f = create_fixture().await;
        put_keys(&f, &["a"]).await;
        *f.store.held_scans_of.lock().unwrap() = Some("blue".to_string());

        // when
        let cancelled = tokio::time::timeout(Duration::from_millis(50), f.flusher.flush()).await;
        *f.store.held_scans_of.lock().unwrap() = None;

        // then: the frozen buffer keeps its records and the next flushes proceed
        assert!(cancelled.is_err());
        assert_eq!(f.store.inner.len("blue"), Some(1));
        let green = f.flusher.flush().await.unwrap();
        assert_eq!(green.meta, None);
        f.clock.advance(Duration::from_millis(15));
        let blue = f.flusher.flush().await.unwrap();
        assert_eq!(blue.meta.unwrap().count, 1);
    }
}
