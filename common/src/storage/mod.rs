//! Storage abstractions shared by the archive.
//!
//! Two kinds of backing store are involved:
//!
//! - A **document store** ([`DocumentStore`]) holding the memtable buffers,
//!   the active-buffer pointer and the sstable metadata index.
//! - An **object store** ([`object_store::ObjectStore`]) holding flushed
//!   sstable blobs. Instances are created from [`config::ObjectStoreConfig`]
//!   by [`factory::create_object_store`].

pub mod config;
pub mod document;
pub mod factory;
pub mod in_memory;

pub use document::{Document, DocumentStore, Filter, FindOptions, SortOrder};
pub use in_memory::InMemoryDocumentStore;

/// Error type for storage operations.
///
/// Backends map their native failures onto these two categories so callers
/// can tell a misbehaving dependency from a broken invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backing store failed or is unreachable.
    Storage(String),
    /// The store is reachable but its contents violate an invariant.
    Internal(String),
}

impl std::error::Error for StorageError {}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Storage(msg) => write!(f, "Storage error: {}", msg),
            StorageError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        StorageError::Storage(err.to_string())
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
