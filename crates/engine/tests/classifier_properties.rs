//! Property-based tests for timeline bucketing and the two leak classifiers.
//!
//! Uses proptest to validate:
//! - Every node byte lands in exactly one place (pre-tracking, a step bucket
//!   or the unassigned tail)
//! - Discarding the first and last buckets removes exactly their bytes
//! - The timeline estimate stays within the range of its inputs
//! - The snapshot estimate recovers the slope of a linear series

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::time::Duration;

use proptest::prelude::*;
use sealant_engine::{
    HeapNode, ParsedHeapProfile, Sample, bucket_timeline, check_leak_with_snapshots,
    check_leak_with_timeline,
};

/// Nodes with strictly increasing ids and arbitrary sizes.
fn nodes_strategy() -> impl Strategy<Value = Vec<HeapNode>> {
    prop::collection::vec((1_u64..5, 0_u64..50_000), 1..80).prop_map(|pairs| {
        let mut id = 0;
        pairs
            .into_iter()
            .map(|(gap, self_size)| {
                id += gap;
                HeapNode { id, self_size }
            })
            .collect()
    })
}

/// Samples with increasing timestamps and non-decreasing ids.
fn samples_strategy() -> impl Strategy<Value = Vec<Sample>> {
    prop::collection::vec((1_u64..3_000_000, 0_u64..40), 1..40).prop_map(|pairs| {
        let mut timestamp_us = 0;
        let mut last_assigned_id = 0;
        pairs
            .into_iter()
            .map(|(dt, did)| {
                timestamp_us += dt;
                last_assigned_id += did;
                Sample {
                    timestamp_us,
                    last_assigned_id,
                }
            })
            .collect()
    })
}

fn durations_strategy() -> impl Strategy<Value = Vec<Duration>> {
    prop::collection::vec(100_u64..5_000, 5..12)
        .prop_map(|ms| ms.into_iter().map(Duration::from_millis).collect())
}

proptest! {
    /// Property: bucketing conserves bytes and never counts a node twice
    #[test]
    fn prop_bucketing_conserves_bytes(
        nodes in nodes_strategy(),
        samples in samples_strategy(),
        durations in durations_strategy(),
    ) {
        let total: u64 = nodes.iter().map(|n| n.self_size).sum();
        let profile = ParsedHeapProfile::from_parts(nodes, samples);

        let buckets = bucket_timeline(&profile, &durations)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let bucketed: u64 = buckets.buckets.iter().sum();
        prop_assert_eq!(
            buckets.pre_tracking_bytes + bucketed + buckets.unassigned_bytes,
            total
        );
        prop_assert!(!buckets.buckets.is_empty());
        prop_assert!(buckets.buckets.len() <= durations.len());
    }

    /// Property: measured steps are the buckets minus the first and the last
    #[test]
    fn prop_measured_steps_drop_edges(
        nodes in nodes_strategy(),
        samples in samples_strategy(),
        durations in durations_strategy(),
    ) {
        let profile = ParsedHeapProfile::from_parts(nodes, samples);
        let buckets = bucket_timeline(&profile, &durations)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let measured_kb: f64 = buckets.measured_steps_kb().iter().sum();
        let expected_bytes = match buckets.buckets.as_slice() {
            [] | [_] => 0,
            [first, .., last] => {
                buckets.buckets.iter().sum::<u64>() - first - last
            }
        };
        prop_assert!((measured_kb - expected_bytes as f64 / 1000.0).abs() < 1e-6);
    }

    /// Property: the trimmed low-mean lies between the smallest and largest value
    #[test]
    fn prop_timeline_estimate_within_range(
        results in prop::collection::vec(0.0_f64..10_000.0, 2..30),
        steps in 0_usize..40,
    ) {
        let verdict = check_leak_with_timeline(steps, &results, 400.0)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let min = results.iter().copied().fold(f64::INFINITY, f64::min);
        let max = results.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(verdict.leak_size_kb >= min - 1e-9);
        prop_assert!(verdict.leak_size_kb <= max + 1e-9);
        prop_assert_eq!(verdict.is_leak, verdict.leak_size_kb > 400.0);
    }

    /// Property: a linear series yields its own slope
    #[test]
    fn prop_snapshot_recovers_linear_slope(
        intercept in 0.0_f64..100_000.0,
        slope in -1_000.0_f64..1_000.0,
        n in 2_usize..25,
    ) {
        let results: Vec<f64> = (1..=n).map(|i| intercept + slope * i as f64).collect();
        let verdict = check_leak_with_snapshots(&results, 400.0)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert!((verdict.leak_size_kb - slope).abs() < 1e-6 * (1.0 + intercept));
    }
}

#[test]
fn timeline_example_lower_half() -> Result<(), sealant_engine::Error> {
    let verdict = check_leak_with_timeline(5, &[10.0, 20.0, 30.0, 40.0, 50.0], 400.0)?;
    assert!((verdict.leak_size_kb - 20.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn snapshot_example_slope() -> Result<(), sealant_engine::Error> {
    let verdict = check_leak_with_snapshots(&[100.0, 110.0, 120.0, 130.0], 400.0)?;
    assert!((verdict.leak_size_kb - 10.0).abs() < 1e-9);
    assert!(!verdict.is_leak);
    Ok(())
}
