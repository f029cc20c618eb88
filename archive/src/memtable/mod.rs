//! The double-buffered memtable.
//!
//! Two buffers, `blue` and `green`, live as collections in the document
//! store. A pointer document in the `meta` collection names the active one:
//!
//! ```text
//! meta:  { _id: "active_memtable", value: "blue" }
//! blue:  { key, ts, doc }, { key, ts, doc }, ...   <- receives puts
//! green: (empty, or being drained by a flush)
//! ```
//!
//! [`Memtable`] resolves the pointer on every call and never caches it, so
//! several processes sharing one document store agree on the active buffer.
//! [`Memtable::swap`] flips the pointer with a compare-and-swap and hands
//! back a [`MemtableHandle`] to the buffer that was active, which the flush
//! pipeline then drains and resets.
//!
//! The pointer document also carries the flush lease (`flushing`): `null`
//! when no flush is running, otherwise `{ owner, since }`. Holding it is
//! what allows a process to swap and drain, so two processes sharing the
//! store never flush at the same time.

mod handle;

pub use handle::MemtableHandle;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use common::{Clock, Document, DocumentStore, Filter, FindOptions, SortOrder};
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::{BufferName, Record};

pub(crate) const META_COLLECTION: &str = "meta";
const ACTIVE_MEMTABLE_ID: &str = "active_memtable";
const POINTER_FIELD: &str = "value";
const LEASE_FIELD: &str = "flushing";

/// Tells apart successive leases of one owner taken within the same
/// millisecond.
static LEASE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Index declared on each buffer: point lookups by key, newest first.
pub(crate) const RECORD_INDEX: [(&str, SortOrder); 2] =
    [("key", SortOrder::Ascending), ("ts", SortOrder::Descending)];

pub(crate) fn to_document(record: &Record) -> Result<Document> {
    match serde_json::to_value(record)? {
        Value::Object(doc) => Ok(doc),
        other => Err(Error::Encoding(format!(
            "record did not encode to a document: {}",
            other
        ))),
    }
}

pub(crate) fn from_document(doc: Document) -> Result<Record> {
    serde_json::from_value(Value::Object(doc))
        .map_err(|e| Error::Encoding(format!("error decoding record: {}", e)))
}

/// Coordinates the blue/green buffer pair.
pub struct Memtable {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    /// Held shared by `put`/`get` from pointer resolution until their
    /// buffer operation completes, and exclusively by `swap` around the
    /// pointer read and compare-and-swap. Once `swap` returns, no write from
    /// this process can still land in the frozen buffer.
    swap_gate: RwLock<()>,
}

impl Memtable {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            swap_gate: RwLock::new(()),
        }
    }

    /// Informational URL of a buffer.
    pub fn location(&self, name: BufferName) -> String {
        self.store.location(name.as_str())
    }

    /// Returns a handle to a buffer, active or not.
    pub fn handle(&self, name: BufferName) -> MemtableHandle {
        MemtableHandle::new(self.store.clone(), name)
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await.map_err(Error::from)
    }

    /// Provisions the pointer document and both buffers, with
    /// [`BufferName::INITIAL`] active.
    ///
    /// Fails if any of them already exists.
    pub async fn init(&self) -> Result<()> {
        self.store
            .create_collection(META_COLLECTION)
            .await
            .map_err(|e| Error::from(e).context("create meta collection"))?;

        let mut pointer = Document::new();
        pointer.insert("_id".to_string(), json!(ACTIVE_MEMTABLE_ID));
        pointer.insert(
            POINTER_FIELD.to_string(),
            json!(BufferName::INITIAL.as_str()),
        );
        pointer.insert(LEASE_FIELD.to_string(), Value::Null);
        self.store
            .insert_one(META_COLLECTION, pointer)
            .await
            .map_err(|e| Error::from(e).context("insert active memtable pointer"))?;

        for name in [BufferName::Blue, BufferName::Green] {
            self.handle(name).create().await?;
        }
        Ok(())
    }

    /// Appends a record to the active buffer, stamped with the current time.
    ///
    /// Returns the location of the buffer the record landed in.
    #[tracing::instrument(level = "trace", skip_all, fields(key = %key))]
    pub async fn put(&self, key: &str, value: Bytes) -> Result<String> {
        let _gate = self.swap_gate.read().await;
        let active = self.active().await?;

        let record = Record::new(key, self.clock.now_millis(), value);
        self.store
            .insert_one(active.as_str(), to_document(&record)?)
            .await
            .map_err(|e| Error::from(e).context("insert record"))?;

        Ok(self.location(active))
    }

    /// Returns the newest record for `key` in the active buffer, along with
    /// the buffer's location. Only the active buffer is consulted.
    #[tracing::instrument(level = "trace", skip_all, fields(key = %key))]
    pub async fn get(&self, key: &str) -> Result<(Option<Record>, String)> {
        let _gate = self.swap_gate.read().await;
        let active = self.active().await?;

        let found = self
            .store
            .find_one(
                active.as_str(),
                &Filter::all().eq("key", key),
                FindOptions::sort_by("ts", SortOrder::Descending),
            )
            .await
            .map_err(|e| Error::from(e).context("find record"))?;

        let record = found.map(from_document).transpose()?;
        Ok((record, self.location(active)))
    }

    /// Makes the inactive buffer active.
    ///
    /// Returns a handle to the previously active buffer, which is now frozen
    /// and must only be drained and reset, plus the location of the newly
    /// active buffer.
    ///
    /// Fails with [`Error::Conflict`] if another process moved the pointer
    /// between the read and the compare-and-swap.
    pub async fn swap(&self) -> Result<(MemtableHandle, String)> {
        let _gate = self.swap_gate.write().await;
        let current = self.active().await?;
        let next = current.other();

        let swapped = self
            .store
            .compare_and_swap(
                META_COLLECTION,
                ACTIVE_MEMTABLE_ID,
                POINTER_FIELD,
                &json!(current.as_str()),
                json!(next.as_str()),
            )
            .await
            .map_err(|e| Error::from(e).context("error updating active memtable"))?;
        if !swapped {
            return Err(Error::Conflict(format!(
                "active memtable changed from {} while swapping",
                current
            )));
        }

        tracing::debug!(frozen = %current, active = %next, "swapped active memtable");
        Ok((self.handle(current), self.location(next)))
    }

    /// Takes the flush lease on behalf of `owner`.
    ///
    /// A lease held by another owner blocks the caller with
    /// [`Error::FlushInProgress`] until it is released or is older than
    /// `timeout_ms`, after which it is taken over. A lease already held by
    /// `owner` itself is always taken over; the caller guarantees it has no
    /// flush of its own still running.
    pub async fn acquire_flush_lease(&self, owner: &str, timeout_ms: i64) -> Result<FlushLease> {
        let doc = self.pointer_doc().await?;
        let current = doc.get(LEASE_FIELD).cloned().ok_or_else(|| {
            Error::Internal(format!("no flushing key in active memtable doc: {:?}", doc))
        })?;
        let now = self.clock.now_millis();

        if let Some(holder) = current.as_object() {
            let held_by = holder.get("owner").and_then(Value::as_str).unwrap_or_default();
            let since = holder.get("since").and_then(Value::as_i64).unwrap_or(i64::MIN);
            if held_by != owner {
                if now.saturating_sub(since) < timeout_ms {
                    return Err(Error::FlushInProgress);
                }
                tracing::warn!(owner = %held_by, since, "taking over expired flush lease");
            }
        }

        let lease = json!({
            "owner": owner,
            "since": now,
            "seq": LEASE_SEQ.fetch_add(1, Ordering::Relaxed),
        });
        let acquired = self
            .store
            .compare_and_swap(
                META_COLLECTION,
                ACTIVE_MEMTABLE_ID,
                LEASE_FIELD,
                &current,
                lease.clone(),
            )
            .await
            .map_err(|e| Error::from(e).context("error acquiring flush lease"))?;
        if !acquired {
            return Err(Error::FlushInProgress);
        }
        Ok(FlushLease {
            store: self.store.clone(),
            held: Some(lease),
        })
    }

    async fn pointer_doc(&self) -> Result<Document> {
        self.store
            .find_one(
                META_COLLECTION,
                &Filter::all().eq("_id", ACTIVE_MEMTABLE_ID),
                FindOptions::default(),
            )
            .await
            .map_err(|e| Error::from(e).context("error reading active memtable doc"))?
            .ok_or_else(|| Error::Internal("no active memtable doc".to_string()))
    }

    /// Reads the active-buffer pointer.
    pub async fn active(&self) -> Result<BufferName> {
        let doc = self.pointer_doc().await?;
        let value = doc.get(POINTER_FIELD).ok_or_else(|| {
            Error::Internal(format!("no value key in active memtable doc: {:?}", doc))
        })?;
        let name = value.as_str().ok_or_else(|| {
            Error::Internal(format!(
                "value in active memtable doc was not string, was: {}",
                value
            ))
        })?;
        BufferName::parse(name)
            .ok_or_else(|| Error::Internal(format!("unknown memtable in active doc: {}", name)))
    }
}

/// The right to flush, recorded on the pointer document.
///
/// Call [`FlushLease::release`] when the flush ends. A lease dropped
/// without release, for example by a cancelled flush, is released from a
/// background task on the current tokio runtime.
pub struct FlushLease {
    store: Arc<dyn DocumentStore>,
    held: Option<Value>,
}

impl FlushLease {
    pub async fn release(mut self) {
        if let Some(held) = self.held.take() {
            release_lease(self.store.as_ref(), &held).await;
        }
    }
}

impl Drop for FlushLease {
    fn drop(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = self.store.clone();
                runtime.spawn(async move { release_lease(store.as_ref(), &held).await });
            }
            Err(_) => tracing::warn!("flush lease dropped outside a runtime; it will expire"),
        }
    }
}

async fn release_lease(store: &dyn DocumentStore, held: &Value) {
    let result = store
        .compare_and_swap(
            META_COLLECTION,
            ACTIVE_MEMTABLE_ID,
            LEASE_FIELD,
            held,
            Value::Null,
        )
        .await;
    match result {
        Ok(true) => {}
        Ok(false) => tracing::warn!("flush lease was taken over before release"),
        Err(e) => tracing::warn!(error = %e, "error releasing flush lease; it will expire"),
    }
}
