//! A tiered key/value archive.
//!
//! Records are written into a double-buffered memtable held in a document
//! store. A flush freezes one buffer, streams its records into an immutable
//! sstable blob in object storage and records the blob's key range in a
//! metadata index. Point reads consult the active buffer first and then
//! the sstables whose range covers the key, newest first.
//!
//! # Key Concepts
//!
//! - **Record**: a `(key, timestamp, value)` triple. A key may be written
//!   many times; the newest record wins.
//! - **Memtable**: two buffers, `blue` and `green`. One receives writes
//!   while the other is empty or being flushed.
//! - **Sstable**: an immutable blob of records sorted by key, described by
//!   a [`Meta`] in the metadata index.
//!
//! # Example
//!
//! ```ignore
//! use archive::{Archive, Config};
//!
//! let archive = Archive::builder(Config::default()).build()?;
//! archive.init().await?;
//! archive.put("user:1", "alice").await?;
//!
//! let stats = archive.flush().await?;
//! println!("wrote {:?}", stats.blob_url);
//! ```

mod archive;
mod blobstore;
mod compactor;
mod config;
mod error;
mod flusher;
mod memtable;
mod metadata;
mod model;
mod reader;
mod sstable;

pub use archive::{Archive, ArchiveBuilder};
pub use compactor::{CompactionOptions, CompactionStats, Compactor, NoopCompactor};
pub use config::{Config, ReadOptions};
pub use error::{Error, Result};
pub use model::{BufferName, FlushStats, GetStats, Record};
pub use sstable::Meta;
