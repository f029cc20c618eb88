//! Process-local [`DocumentStore`].
//!
//! Collections live in a [`DashMap`]; each collection keeps its documents in
//! insertion order. Queries snapshot the matching documents up front, so a
//! scan is never affected by writes that land after it started.

use std::cmp::Ordering;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde_json::Value;

use super::document::{
    Document, DocumentStore, Filter, FindOptions, ID_FIELD, SortOrder, compare_values,
};
use super::{StorageError, StorageResult};

#[derive(Debug, Default)]
struct Collection {
    docs: Vec<Document>,
    indexes: Vec<Vec<(String, SortOrder)>>,
}

/// An in-memory document database.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    url: String,
    database: String,
    collections: DashMap<String, Collection>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new("memory://localhost", "archive")
    }
}

impl InMemoryDocumentStore {
    /// Creates an empty store. `url` and `database` only feed
    /// [`DocumentStore::location`].
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            database: database.into(),
            collections: DashMap::new(),
        }
    }

    /// Returns the names of all existing collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns the number of documents in a collection, if it exists.
    pub fn len(&self, collection: &str) -> Option<usize> {
        self.collections.get(collection).map(|c| c.docs.len())
    }

    /// Returns the indexes declared on a collection.
    pub fn indexes(&self, collection: &str) -> Vec<Vec<(String, SortOrder)>> {
        self.collections
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }
}

fn sort_key_cmp(a: &Document, b: &Document, field: &str) -> Ordering {
    match (a.get(field), b.get(field)) {
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn location(&self, collection: &str) -> String {
        format!("{}/{}/{}", self.url, self.database, collection)
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn create_collection(&self, name: &str) -> StorageResult<()> {
        match self.collections.entry(name.to_string()) {
            Entry::Occupied(_) => Err(StorageError::Storage(format!(
                "collection already exists: {}.{}",
                self.database, name
            ))),
            Entry::Vacant(entry) => {
                entry.insert(Collection::default());
                Ok(())
            }
        }
    }

    async fn drop_collection(&self, name: &str) -> StorageResult<()> {
        self.collections.remove(name);
        Ok(())
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: &[(&str, SortOrder)],
    ) -> StorageResult<()> {
        let index: Vec<(String, SortOrder)> =
            keys.iter().map(|(f, o)| (f.to_string(), *o)).collect();
        let mut coll = self.collections.entry(collection.to_string()).or_default();
        if !coll.indexes.contains(&index) {
            coll.indexes.push(index);
        }
        Ok(())
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> StorageResult<()> {
        let mut coll = self.collections.entry(collection.to_string()).or_default();
        if let Some(id) = doc.get(ID_FIELD)
            && coll.docs.iter().any(|d| d.get(ID_FIELD) == Some(id))
        {
            return Err(StorageError::Storage(format!(
                "duplicate key in {}.{}: {}",
                self.database, collection, id
            )));
        }
        coll.docs.push(doc);
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: FindOptions,
    ) -> StorageResult<BoxStream<'static, StorageResult<Document>>> {
        let mut matched: Vec<Document> = match self.collections.get(collection) {
            Some(coll) => match &options.sort {
                Some((_, SortOrder::Descending)) => coll
                    .docs
                    .iter()
                    .rev()
                    .filter(|d| filter.matches(d))
                    .cloned()
                    .collect(),
                _ => coll
                    .docs
                    .iter()
                    .filter(|d| filter.matches(d))
                    .cloned()
                    .collect(),
            },
            None => Vec::new(),
        };

        // sort_by is stable, which gives the tie-breaking documented on the trait
        if let Some((field, order)) = &options.sort {
            matched.sort_by(|a, b| {
                let ord = sort_key_cmp(a, b, field);
                match order {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = options.limit {
            matched.truncate(limit);
        }

        Ok(stream::iter(matched.into_iter().map(Ok)).boxed())
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        expected: &Value,
        new: Value,
    ) -> StorageResult<bool> {
        let Some(mut coll) = self.collections.get_mut(collection) else {
            return Ok(false);
        };
        let id = Value::String(id.to_string());
        let Some(doc) = coll.docs.iter_mut().find(|d| d.get(ID_FIELD) == Some(&id)) else {
            return Ok(false);
        };
        if doc.get(field) != Some(expected) {
            return Ok(false);
        }
        doc.insert(field.to_string(), new);
        Ok(true)
    }
}
