//! Chunk splitting: partitioning, name filters and graph rewrites

pub mod filter;
pub mod partition;
pub mod rewrite;

pub use filter::ChunkFilter;
pub use partition::{partition, ByteSize, GroupCount, SizeModel, SplitMode};
pub use rewrite::{Rewrite, RewriteResult, SplitPlan, Strategy};

/// Normalized options of one splitting pass
#[derive(Debug, Clone)]
pub struct SplitPolicy {
    pub mode: SplitMode,
    pub group_count: GroupCount,

    /// Split runtime chunks into lazily fetched children rather than a
    /// static chain
    pub asynchronous: bool,

    /// Only these entry chunks are split. `None` means every one.
    pub include: Option<ChunkFilter>,

    /// Never split these chunks
    pub exclude: ChunkFilter,
}

impl Default for SplitPolicy {
    fn default() -> Self {
        Self {
            mode: SplitMode::Disabled,
            group_count: GroupCount::default(),
            asynchronous: true,
            include: None,
            exclude: ChunkFilter::empty(),
        }
    }
}

impl SplitPolicy {
    /// Split into `n` groups
    pub fn divide(n: usize) -> Self {
        Self {
            mode: SplitMode::from_limits(n, 0.0),
            ..Self::default()
        }
    }

    /// Split into groups below `kb` kilobytes
    pub fn max_size_kb(kb: f64) -> Self {
        Self {
            mode: SplitMode::from_limits(0, kb * 1024.0),
            ..Self::default()
        }
    }

    pub fn synchronous(mut self) -> Self {
        self.asynchronous = false;
        self
    }

    pub fn include<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.include = Some(ChunkFilter::new(names));
        self
    }

    pub fn exclude<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.exclude = ChunkFilter::new(names);
        self
    }

    pub fn with_group_count(mut self, group_count: GroupCount) -> Self {
        self.group_count = group_count;
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.mode.is_disabled()
    }
}
