use std::sync::Arc;

use common::{DocumentStore, Filter, FindOptions};
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{RECORD_INDEX, from_document};
use crate::error::{Error, Result};
use crate::model::{BufferName, Record};

/// A handle to one memtable buffer, independent of which one is active.
///
/// The flush pipeline receives one from [`Memtable::swap`](super::Memtable::swap)
/// for the frozen buffer, drains it and finally resets it.
#[derive(Clone)]
pub struct MemtableHandle {
    store: Arc<dyn DocumentStore>,
    name: BufferName,
}

impl MemtableHandle {
    pub(crate) fn new(store: Arc<dyn DocumentStore>, name: BufferName) -> Self {
        Self { store, name }
    }

    pub fn name(&self) -> BufferName {
        self.name
    }

    pub fn location(&self) -> String {
        self.store.location(self.name.as_str())
    }

    /// Creates the buffer's collection and its `(key asc, ts desc)` index.
    pub async fn create(&self) -> Result<()> {
        self.store
            .create_collection(self.name.as_str())
            .await
            .map_err(|e| Error::from(e).context("CreateCollection"))?;
        self.store
            .create_index(self.name.as_str(), &RECORD_INDEX)
            .await
            .map_err(|e| Error::from(e).context("CreateIndex"))?;
        Ok(())
    }

    /// Streams every record in the buffer into `tx`, in storage order.
    ///
    /// The channel is closed when this returns, which tells the receiver the
    /// sequence is complete. If reading the buffer fails part-way, the error
    /// is sent down the channel before being returned, so the receiver
    /// never mistakes a failed drain for a short one.
    ///
    /// Returns the number of records sent.
    #[tracing::instrument(level = "debug", skip_all, fields(memtable = %self.name))]
    pub async fn drain(&self, tx: mpsc::Sender<Result<Record>>) -> Result<usize> {
        let mut cursor = match self
            .store
            .find(self.name.as_str(), &Filter::all(), FindOptions::default())
            .await
        {
            Ok(cursor) => cursor,
            Err(e) => return Err(fail(&tx, Error::from(e).context("Find")).await),
        };

        let mut sent = 0;
        while let Some(item) = cursor.next().await {
            let record = match item.map_err(Error::from).and_then(from_document) {
                Ok(record) => record,
                Err(e) => return Err(fail(&tx, e.context("cursor error")).await),
            };
            if tx.send(Ok(record)).await.is_err() {
                return Err(Error::Internal(
                    "sstable writer stopped receiving before drain completed".to_string(),
                ));
            }
            sent += 1;
        }

        Ok(sent)
    }

    /// Empties the buffer by dropping and recreating it, index included.
    ///
    /// Only call this once the drained records are committed elsewhere.
    pub async fn reset(&self) -> Result<()> {
        self.store
            .drop_collection(self.name.as_str())
            .await
            .map_err(|e| Error::from(e).context("Drop"))?;
        self.create().await
    }
}

async fn fail(tx: &mpsc::Sender<Result<Record>>, err: Error) -> Error {
    // the receiver may already be gone; the caller still gets the error
    let _ = tx.send(Err(err.clone())).await;
    err
}
