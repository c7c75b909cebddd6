//! Splits a unit of work into independent partitions.
//!
//! Two shapes are supported: an inclusive numeric ID interval (used by the summarize, embed and
//! index stages over persisted rows) and a list of feed sources (used by the collect stage).
//! Both are pure functions of their inputs.

use serde::Serialize;
use thiserror::Error;

/// Errors raised while computing partitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    /// Bounds are absent or inverted, meaning there are no eligible rows.
    #[error("no eligible work to partition")]
    EmptyWorkingSet,
    /// A grid size of zero cannot produce partitions.
    #[error("grid size must be at least 1")]
    InvalidGridSize,
}

/// Inclusive `[start, end]` ID bounds assigned to one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionRange {
    /// Zero-based partition index, stable for logging.
    pub index: usize,
    /// First ID in the partition.
    pub start: i64,
    /// Last ID in the partition.
    pub end: i64,
}

impl PartitionRange {
    /// Number of IDs covered by the range.
    pub fn len(&self) -> u64 {
        (i128::from(self.end) - i128::from(self.start) + 1) as u64
    }

    /// Ranges are never empty by construction; provided for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Split `[min, max]` into at most `grid_size` contiguous, disjoint, gap-free ranges whose sizes
/// differ by at most one.
///
/// The first `total % grid_size` partitions receive one extra ID and the last partition's end is
/// pinned to `max`. When there are fewer IDs than partitions, empty partitions are omitted, so a
/// single-ID interval always yields exactly one range.
pub fn calculate(
    min: Option<i64>,
    max: Option<i64>,
    grid_size: usize,
) -> Result<Vec<PartitionRange>, PartitionError> {
    if grid_size == 0 {
        return Err(PartitionError::InvalidGridSize);
    }
    let (min, max) = match (min, max) {
        (Some(min), Some(max)) if min <= max => (min, max),
        _ => return Err(PartitionError::EmptyWorkingSet),
    };

    // i128 keeps `max - min + 1` exact across the whole i64 domain.
    let total = i128::from(max) - i128::from(min) + 1;
    let grid = grid_size as i128;
    let base = total / grid;
    let remainder = total % grid;

    let mut ranges = Vec::with_capacity(grid_size.min(total as usize));
    let mut next = i128::from(min);
    for index in 0..grid_size {
        let size = if (index as i128) < remainder {
            base + 1
        } else {
            base
        };
        if size == 0 {
            break;
        }
        let end = next + size - 1;
        ranges.push(PartitionRange {
            index,
            start: next as i64,
            end: end as i64,
        });
        next = end + 1;
    }

    if let Some(last) = ranges.last_mut() {
        last.end = max;
    }

    Ok(ranges)
}

/// Split sources into contiguous slices of `ceil(count / grid_size)` items.
///
/// The trailing slice may be shorter; slices beyond the available sources are omitted, so fewer
/// than `grid_size` partitions is a valid outcome. An empty input yields
/// [`PartitionError::EmptyWorkingSet`].
pub fn partition_sources<T: Clone>(
    sources: &[T],
    grid_size: usize,
) -> Result<Vec<Vec<T>>, PartitionError> {
    if grid_size == 0 {
        return Err(PartitionError::InvalidGridSize);
    }
    if sources.is_empty() {
        return Err(PartitionError::EmptyWorkingSet);
    }

    let slice_len = sources.len().div_ceil(grid_size);
    Ok(sources
        .chunks(slice_len)
        .take(grid_size)
        .map(<[T]>::to_vec)
        .collect())
}
