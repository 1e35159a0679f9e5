//! Module partitioning
//!
//! Pure functions that cut an ordered module list into ordered groups.
//! Order is preserved within and across groups so the generated bundles are
//! stable from one build to the next.

use std::fmt;
use std::sync::Arc;

use crate::bundler::Module;

/// Custom `(module_count, divide) -> group_count` function
pub type GroupCountFn = Arc<dyn Fn(usize, usize) -> usize + Send + Sync>;

/// Weight of a module for size-based splitting
pub trait SizeModel {
    fn weight(&self, module: &Module) -> f64;
}

/// Weighs a module by its byte size
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteSize;

impl SizeModel for ByteSize {
    fn weight(&self, module: &Module) -> f64 {
        module.size as f64
    }
}

/// How a chunk's modules are cut
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitMode {
    /// Leave chunks alone
    Disabled,
    /// Cut into this many groups of near-equal length
    Count(usize),
    /// Keep every group below this many bytes
    MaxSize(f64),
}

impl SplitMode {
    /// Pick the mode from normalized options. A count wins over a size.
    pub fn from_limits(divide: usize, max_size: f64) -> Self {
        if divide > 1 {
            SplitMode::Count(divide)
        } else if max_size > 0.0 && max_size.is_finite() {
            SplitMode::MaxSize(max_size)
        } else {
            SplitMode::Disabled
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, SplitMode::Disabled)
    }
}

/// An optional custom group count
#[derive(Clone, Default)]
pub struct GroupCount(Option<GroupCountFn>);

impl GroupCount {
    pub fn custom(f: impl Fn(usize, usize) -> usize + Send + Sync + 'static) -> Self {
        Self(Some(Arc::new(f)))
    }

    /// Slices of `ceil(count / divide)` modules
    pub fn ceil() -> Self {
        Self::custom(|count, divide| {
            let per_group = count.div_ceil(divide.max(1)).max(1);
            count.div_ceil(per_group)
        })
    }

    pub fn is_custom(&self) -> bool {
        self.0.is_some()
    }

    fn get(&self) -> Option<&GroupCountFn> {
        self.0.as_ref()
    }
}

impl fmt::Debug for GroupCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("GroupCount(custom)"),
            None => f.write_str("GroupCount(balanced)"),
        }
    }
}

/// Lengths of `groups` near-equal groups covering `count` items. The longer
/// groups come last.
pub fn balanced_sizes(count: usize, groups: usize) -> Vec<usize> {
    if groups == 0 {
        return Vec::new();
    }

    let base = count / groups;
    let longer = count % groups;

    (0..groups)
        .map(|index| if index < groups - longer { base } else { base + 1 })
        .collect()
}

/// Cut `items` into `divide` groups (at most one per item)
pub fn by_count<T: Clone>(items: &[T], divide: usize, group_count: &GroupCount) -> Vec<Vec<T>> {
    if items.is_empty() || divide < 2 {
        return Vec::new();
    }

    let count = items.len();
    let groups = match group_count.get() {
        Some(f) => {
            let groups = f(count, divide).max(1);
            if groups >= count {
                return vec![items.to_vec()];
            }
            groups
        }
        None => divide.min(count),
    };

    let mut result = Vec::with_capacity(groups);
    let mut start = 0;
    for len in balanced_sizes(count, groups) {
        result.push(items[start..start + len].to_vec());
        start += len;
    }

    result
}

/// Cut `items` so every group weighs less than `ceiling`. An item that is
/// too heavy on its own gets a group to itself.
pub fn by_size<T: Clone>(items: &[T], ceiling: f64, weight: impl Fn(&T) -> f64) -> Vec<Vec<T>> {
    if items.is_empty() || !(ceiling > 0.0) {
        return Vec::new();
    }

    let mut result: Vec<Vec<T>> = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut running = 0.0;

    for item in items {
        let size = weight(item);

        if !current.is_empty() && running + size >= ceiling {
            result.push(std::mem::take(&mut current));
            running = 0.0;
        }

        current.push(item.clone());
        running += size;
    }

    if !current.is_empty() {
        result.push(current);
    }

    result
}

/// Partition `items` under `mode`. An empty result means "do not split".
pub fn partition<T: Clone>(
    items: &[T],
    mode: SplitMode,
    group_count: &GroupCount,
    weight: impl Fn(&T) -> f64,
) -> Vec<Vec<T>> {
    match mode {
        SplitMode::Disabled => Vec::new(),
        SplitMode::Count(divide) => by_count(items, divide, group_count),
        SplitMode::MaxSize(ceiling) => by_size(items, ceiling, weight),
    }
}
