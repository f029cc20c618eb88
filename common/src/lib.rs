//! Shared plumbing for the archive: time sources and storage backends.

pub mod clock;
pub mod storage;

pub use clock::{Clock, MockClock, SystemClock};
pub use storage::config::ObjectStoreConfig;
pub use storage::factory::{create_object_store, object_store_url};
pub use storage::{
    Document, DocumentStore, Filter, FindOptions, InMemoryDocumentStore, SortOrder, StorageError,
    StorageResult,
};
