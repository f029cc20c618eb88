//! The document store abstraction.
//!
//! Documents are JSON objects grouped into named collections, in the style
//! of a MongoDB database. The archive needs only a narrow slice of such a
//! store: point lookups sorted by a field, full scans, collection
//! lifecycle, and a single-field compare-and-swap on a document addressed
//! by `_id`.

use std::cmp::Ordering;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;

use super::StorageResult;

/// A stored document.
pub type Document = serde_json::Map<String, Value>;

/// Name of the field holding a document's identity.
pub const ID_FIELD: &str = "_id";

/// Sort direction for queries and index keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A single predicate on a document field.
///
/// Comparisons are defined between two strings (lexicographic) or two
/// numbers. A missing field, or values of different kinds, never match.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    Lte(String, Value),
    Gte(String, Value),
}

impl Condition {
    fn matches(&self, doc: &Document) -> bool {
        let (field, expected) = match self {
            Condition::Eq(f, v) | Condition::Lte(f, v) | Condition::Gte(f, v) => (f, v),
        };
        let Some(actual) = doc.get(field) else {
            return false;
        };
        match self {
            Condition::Eq(..) => actual == expected,
            Condition::Lte(..) => matches!(
                compare_values(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Condition::Gte(..) => matches!(
                compare_values(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

/// A conjunction of [`Condition`]s. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// A filter matching every document.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Eq(field.into(), value.into()));
        self
    }

    pub fn lte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Lte(field.into(), value.into()));
        self
    }

    pub fn gte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Gte(field.into(), value.into()));
        self
    }

    /// Returns true if `doc` satisfies every condition.
    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|c| c.matches(doc))
    }
}

/// Ordering and size limits for a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn sort_by(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            sort: Some((field.into(), order)),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Compares two JSON values of the same kind.
///
/// Returns `None` when the values are not comparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// A collection-oriented document database.
///
/// Implementations must be safe to share between tasks. Every method is a
/// single round trip; none retries internally.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Informational URL of a collection, `scheme://host/database/collection`.
    fn location(&self, collection: &str) -> String;

    /// Checks that the store is reachable.
    async fn ping(&self) -> StorageResult<()>;

    /// Creates an empty collection. Fails if it already exists.
    async fn create_collection(&self, name: &str) -> StorageResult<()>;

    /// Drops a collection and all its documents. Dropping a missing
    /// collection succeeds.
    async fn drop_collection(&self, name: &str) -> StorageResult<()>;

    /// Declares a compound index on `collection`.
    async fn create_index(&self, collection: &str, keys: &[(&str, SortOrder)])
    -> StorageResult<()>;

    /// Inserts a document, creating the collection if needed. Fails if a
    /// document with the same `_id` already exists.
    async fn insert_one(&self, collection: &str, doc: Document) -> StorageResult<()>;

    /// Streams every matching document.
    ///
    /// Without a sort, documents come back in storage (insertion) order.
    /// With a sort, documents whose sort keys tie keep insertion order when
    /// ascending, and reverse insertion order when descending, so the most
    /// recently inserted of equal documents comes first in a descending
    /// query. A missing collection yields an empty stream.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: FindOptions,
    ) -> StorageResult<BoxStream<'static, StorageResult<Document>>>;

    /// Returns the first document [`find`](DocumentStore::find) would yield.
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        options: FindOptions,
    ) -> StorageResult<Option<Document>> {
        let mut stream = self
            .find(collection, filter, options.with_limit(1))
            .await?;
        stream.next().await.transpose()
    }

    /// Atomically sets `field` to `new` on the document with `_id == id`,
    /// provided the field currently equals `expected`.
    ///
    /// Returns `false`, changing nothing, if the document is missing or the
    /// field holds another value.
    async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        expected: &Value,
        new: Value,
    ) -> StorageResult<bool>;
}
