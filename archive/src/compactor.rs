//! Compaction interface.
//!
//! Compaction merges several sstables into fewer, larger ones. The merge
//! policy lives behind [`Compactor`]; the archive only invokes it and
//! reports what it did.

use async_trait::async_trait;

use crate::error::Result;

/// Policy hints passed to a [`Compactor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionOptions {
    /// Minimum number of overlapping sstables worth merging in one run.
    pub min_inputs: usize,

    /// Upper bound on records per output sstable, if any.
    pub max_output_records: Option<u64>,
}

impl Default for CompactionOptions {
    fn default() -> Self {
        Self {
            min_inputs: 2,
            max_output_records: None,
        }
    }
}

/// Outcome of one merge performed by a [`Compactor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Locations of the sstables that were merged.
    pub inputs: Vec<String>,

    /// Location of the sstable produced by the merge.
    pub output: String,

    /// Records written to the output.
    pub records: u64,
}

/// Merges sstables.
///
/// Implementations decide which sstables to merge and how to update the
/// metadata index. They must never leave a committed key range unreadable.
#[async_trait]
pub trait Compactor: Send + Sync {
    /// Runs one compaction pass, returning one entry per merge performed.
    async fn run(&self, options: CompactionOptions) -> Result<Vec<CompactionStats>>;
}

/// A compactor that never merges anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCompactor;

#[async_trait]
impl Compactor for NoopCompactor {
    async fn run(&self, options: CompactionOptions) -> Result<Vec<CompactionStats>> {
        tracing::debug!(?options, "compaction is disabled");
        Ok(Vec::new())
    }
}
