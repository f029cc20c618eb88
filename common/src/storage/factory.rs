//! Object store factory.
//!
//! Builds the blob store backend from [`ObjectStoreConfig`] and derives the
//! informational URL prefix that locations handed back to callers start with.

use std::sync::Arc;

use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;

use super::config::ObjectStoreConfig;
use super::{StorageError, StorageResult};

/// Creates an object store from configuration.
///
/// For [`ObjectStoreConfig::Local`] the directory is created if it does not
/// exist yet.
pub fn create_object_store(config: &ObjectStoreConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config {
        ObjectStoreConfig::InMemory => Ok(Arc::new(InMemory::new())),
        ObjectStoreConfig::Aws(aws_config) => {
            let store = AmazonS3Builder::from_env()
                .with_region(&aws_config.region)
                .with_bucket_name(&aws_config.bucket)
                .build()
                .map_err(|e| {
                    StorageError::Storage(format!("Failed to create AWS S3 store: {}", e))
                })?;
            Ok(Arc::new(store))
        }
        ObjectStoreConfig::Local(local_config) => {
            std::fs::create_dir_all(&local_config.path).map_err(|e| {
                StorageError::Storage(format!(
                    "Failed to create storage directory '{}': {}",
                    local_config.path, e
                ))
            })?;
            let store = LocalFileSystem::new_with_prefix(&local_config.path).map_err(|e| {
                StorageError::Storage(format!("Failed to create local filesystem store: {}", e))
            })?;
            Ok(Arc::new(store))
        }
    }
}

/// Returns the `scheme://host` prefix identifying the configured store.
///
/// The prefix is only used to build diagnostic location strings; nothing
/// parses it back.
pub fn object_store_url(config: &ObjectStoreConfig) -> String {
    match config {
        ObjectStoreConfig::InMemory => "memory://sstables".to_string(),
        ObjectStoreConfig::Aws(aws_config) => format!("s3://{}", aws_config.bucket),
        ObjectStoreConfig::Local(local_config) => {
            format!("file://{}", local_config.path.trim_end_matches('/'))
        }
    }
}
