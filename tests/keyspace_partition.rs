// tests/keyspace_partition.rs

use std::num::NonZeroU64;

use proptest::prelude::*;

use fleetsched::keyspace::{partition, DescriptorEstimator, KeyspaceDescriptor, KeyspaceEstimator};
use fleetsched::model::KeyRange;

fn size(n: u64) -> NonZeroU64 {
    NonZeroU64::new(n).unwrap()
}

#[test]
fn uneven_total_leaves_short_last_task() {
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
    assert!(partition(0, size(1000)).is_empty());
}

#[test]
fn huge_keyspace_does_not_overflow() {
    let ranges: Vec<_> = fleetsched::keyspace::Partition::new(u64::MAX, size(u64::MAX / 2))
        .collect();
    assert_eq!(ranges.len(), 3);
    assert_eq!(ranges.last().unwrap().end, u64::MAX);
}

#[test]
fn estimator_modes() {
    let est = DescriptorEstimator;
    let dict = KeyspaceDescriptor::Dictionary {
        wordlist_size: 1000,
        rule_count: 0,
    };
    assert_eq!(est.total(&dict).unwrap(), 1000);

    let hybrid = KeyspaceDescriptor::Hybrid {
        wordlist_size: 1000,
        mask: "?d?d".to_string(),
    };
    assert_eq!(est.total(&hybrid).unwrap(), 100_000);

    let overflow = KeyspaceDescriptor::Mask {
        mask: "?b".repeat(9),
    };
    assert!(est.total(&overflow).is_err());
}

proptest! {
    #[test]
    fn ranges_cover_keyspace_exactly(total in 0u64..50_000, task_size in 1u64..5_000) {
        let ranges = partition(total, size(task_size));

        let mut expected_start = 0;
        for range in &ranges {
            prop_assert_eq!(range.start, expected_start);
            prop_assert!(range.end > range.start);
            prop_assert!(range.len() <= task_size);
            expected_start = range.end;
        }
        prop_assert_eq!(expected_start, total);

        // Only the last range may be short.
        if let Some((_, init)) = ranges.split_last() {
            prop_assert!(init.iter().all(|r| r.len() == task_size));
        }
    }
}
