//! The sstable metadata index.
//!
//! One document per committed sstable, keyed by blob location, in the
//! `sstables` collection of the document store. Committed entries are never
//! updated.

use std::sync::Arc;

use common::storage::document::ID_FIELD;
use common::{Document, DocumentStore, Filter, FindOptions, SortOrder};
use futures::TryStreamExt;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::sstable::Meta;

pub(crate) const SSTABLES_COLLECTION: &str = "sstables";

/// Index declared on the metadata collection for range lookups.
const RANGE_INDEX: [(&str, SortOrder); 2] =
    [("min_key", SortOrder::Ascending), ("max_key", SortOrder::Ascending)];

/// Maps key ranges to sstable locations.
pub struct MetadataIndex {
    store: Arc<dyn DocumentStore>,
}

impl MetadataIndex {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn location(&self) -> String {
        self.store.location(SSTABLES_COLLECTION)
    }

    /// Creates the metadata collection and its range index.
    pub async fn init(&self) -> Result<()> {
        self.store
            .create_collection(SSTABLES_COLLECTION)
            .await
            .map_err(|e| Error::from(e).context("metadata.init"))?;
        self.store
            .create_index(SSTABLES_COLLECTION, &RANGE_INDEX)
            .await
            .map_err(|e| Error::from(e).context("metadata.init"))?;
        Ok(())
    }

    /// Commits the metadata of a written sstable.
    ///
    /// Committing the same location twice fails.
    pub async fn insert(&self, meta: &Meta) -> Result<()> {
        let mut doc = match serde_json::to_value(meta)? {
            Value::Object(doc) => doc,
            other => {
                return Err(Error::Encoding(format!(
                    "sstable metadata did not encode to a document: {}",
                    other
                )));
            }
        };
        doc.insert(ID_FIELD.to_string(), json!(meta.location));
        self.store
            .insert_one(SSTABLES_COLLECTION, doc)
            .await
            .map_err(|e| Error::from(e).context("metadata.insert"))
    }

    /// Returns every sstable whose key range contains `key`, most recently
    /// created first.
    #[tracing::instrument(level = "trace", skip_all, fields(key = %key))]
    pub async fn containing(&self, key: &str) -> Result<Vec<Meta>> {
        let filter = Filter::all().lte("min_key", key).gte("max_key", key);
        let mut cursor = self
            .store
            .find(
                SSTABLES_COLLECTION,
                &filter,
                FindOptions::sort_by("created", SortOrder::Descending),
            )
            .await
            .map_err(|e| Error::from(e).context("metadata.containing"))?;

        let mut metas = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| Error::from(e).context("metadata.containing"))?
        {
            metas.push(decode(doc)?);
        }
        Ok(metas)
    }
}

fn decode(mut doc: Document) -> Result<Meta> {
    doc.remove(ID_FIELD);
    serde_json::from_value(Value::Object(doc))
        .map_err(|e| Error::Encoding(format!("error decoding sstable metadata: {}", e)))
}

#[cfg(test)]
mod tests {
    use common::InMemoryDocumentStore;

    use super::*;

    fn meta(min_key: &str, max_key: &str, created: i64) -> Meta {
        Meta {
            min_key: min_key.to_string(),
            max_key: max_key.to_string(),
            min_time: created - 100,
            max_time: created - 1,
            count: 2,
            size: 64,
            created,
            location: format!("{}.sstable", created),
        }
    }

    async fn create_index() -> MetadataIndex {
        let index = MetadataIndex::new(Arc::new(InMemoryDocumentStore::default()));
        index.init().await.unwrap();
        index
    }

    #[tokio::test]
    async fn should_return_covering_sstables_newest_first() {
        // given
        let index = create_index().await;
        index.insert(&meta("001", "010", 1_000)).await.unwrap();
        index.insert(&meta("011", "020", 2_000)).await.unwrap();
        index.insert(&meta("003", "013", 3_000)).await.unwrap();

        // when
        let found = index.containing("012").await.unwrap();

        // then
        let created: Vec<i64> = found.iter().map(|m| m.created).collect();
        assert_eq!(created, vec![3_000, 2_000]);
        assert_eq!(found[0], meta("003", "013", 3_000));
    }

    #[tokio::test]
    async fn should_include_range_bounds() {
        // given
        let index = create_index().await;
        index.insert(&meta("003", "013", 3_000)).await.unwrap();

        // then
        assert_eq!(index.containing("003").await.unwrap().len(), 1);
        assert_eq!(index.containing("013").await.unwrap().len(), 1);
        assert!(index.containing("0135").await.unwrap().is_empty());
        assert!(index.containing("002").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_reject_committing_same_sstable_twice() {
        // given
        let index = create_index().await;
        index.insert(&meta("a", "b", 1)).await.unwrap();

        // when
        let result = index.insert(&meta("a", "b", 1)).await;

        // then
        assert!(matches!(result, Err(Error::Storage(msg)) if msg.starts_with("metadata.insert")));
    }

    #[tokio::test]
    async fn should_fail_second_init() {
        let index = create_index().await;
        assert!(index.init().await.is_err());
    }
}
