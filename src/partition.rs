use std::ops::Range;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("worker count must be at least 1")]
    NoWorkers,
}

/// Split `[0, total)` into `workers` contiguous ranges of `total / workers`
/// indices each; the last range also takes the remainder.
///
/// With more workers than items every range but the last is empty.
pub fn partition(total: usize, workers: usize) -> Result<Vec<Range<usize>>, PartitionError> {
    if workers == 0 {
        return Err(PartitionError::NoWorkers);
    }
    if total == 0 {
        return Ok(Vec::new());
    }

    let base = total / workers;
    let mut ranges: Vec<Range<usize>> = (0..workers - 1).map(|i| i * base..(i + 1) * base).collect();
    ranges.push((workers - 1) * base..total);
    Ok(ranges)
}
