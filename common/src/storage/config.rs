//! Serializable configuration for the blob (object) store.

use serde::{Deserialize, Serialize};

/// Which object store holds flushed sstables.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ObjectStoreConfig {
    /// Process-local, non-durable store. Useful for tests.
    #[default]
    InMemory,
    /// Amazon S3 (credentials are read from the environment).
    Aws(AwsObjectStoreConfig),
    /// A directory on the local filesystem.
    Local(LocalObjectStoreConfig),
}

/// Settings for an S3 bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsObjectStoreConfig {
    pub region: String,
    pub bucket: String,
}

/// Settings for a local directory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalObjectStoreConfig {
    /// Root directory; created if missing.
    pub path: String,
}
