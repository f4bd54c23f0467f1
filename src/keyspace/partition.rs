// src/keyspace/partition.rs

use std::num::NonZeroU64;

use crate::model::KeyRange;

/// Iterator over the task ranges of one keyspace.
///
/// Ranges are ascending, disjoint and cover `[0, total)` exactly. Every
/// range holds `task_size` units except possibly the last.
#[derive(Debug, Clone)]
pub struct Partition {
    next_start: u64,
    total: u64,
    task_size: u64,
}

impl Partition {
    pub fn new(total: u64, task_size: NonZeroU64) -> Self {
        Self {
            next_start: 0,
            total,
            task_size: task_size.get(),
        }
    }

    /// Number of ranges still to be yielded.
    pub fn remaining(&self) -> u64 {
        (self.total - self.next_start.min(self.total)).div_ceil(self.task_size)
    }
}

impl Iterator for Partition {
    type Item = KeyRange;

    fn next(&mut self) -> Option<KeyRange> {
        if self.next_start >= self.total {
            return None;
        }
        let start = self.next_start;
        let end = start.saturating_add(self.task_size).min(self.total);
        self.next_start = end;
        Some(KeyRange::new(start, end))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.remaining()) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

/// Slice `[0, total)` into task ranges of at most `task_size` units.
///
/// A zero keyspace yields no ranges.
pub fn partition(total: u64, task_size: NonZeroU64) -> Vec<KeyRange> {
    Partition::new(total, task_size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    #[test]
    fn trailing_range_is_short() {
        assert_eq!(
            partition(2500, size(1000)),
            vec![
                KeyRange::new(0, 1000),
                KeyRange::new(1000, 2000),
                KeyRange::new(2000, 2500),
            ]
        );
    }

    #[test]
    fn zero_keyspace_yields_nothing() {
        assert!(partition(0, size(10)).is_empty());
    }

    #[test]
    fn huge_task_size_gives_single_range() {
        assert_eq!(partition(7, size(u64::MAX)), vec![KeyRange::new(0, 7)]);
    }

    #[test]
    fn size_hint_is_exact() {
        let p = Partition::new(10_001, size(1000));
        assert_eq!(p.size_hint(), (11, Some(11)));
        assert_eq!(p.count(), 11);
    }
}
