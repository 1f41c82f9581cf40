//! Leak classification.
//!
//! Two independent estimators turn measured heap sizes into a leak rate:
//!
//! - **Timeline**: one artifact recorded across all repeats is split into
//!   per-repeat byte totals using its sample checkpoints; the verdict is a
//!   trimmed low-mean of those totals, which ignores upward spikes from GC
//!   pauses.
//! - **Snapshot**: one artifact per repeat is reduced to its total size and an
//!   ordinary-least-squares line is fitted through the totals; the slope is the
//!   amount retained per repeat.
//!
//! All sizes reported here are in KB (1 KB = 1000 bytes).

use std::fmt;
use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::heap::ParsedHeapProfile;

/// Minimum number of step durations a timeline can be split with.
pub const MIN_TIMELINE_STEPS: usize = 5;

/// Minimum number of results either classifier accepts.
pub const MIN_RESULTS: usize = 2;

const BYTES_PER_KB: f64 = 1000.0;

/// How heap growth is measured across repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureMode {
    /// One continuous allocation timeline across all repeats.
    #[default]
    Timeline,
    /// One heap snapshot after every repeat.
    Snapshot,
}

impl MeasureMode {
    /// File extension used when an artifact of this mode is saved.
    #[must_use]
    pub const fn artifact_extension(self) -> &'static str {
        match self {
            Self::Timeline => "heaptimeline",
            Self::Snapshot => "heapsnapshot",
        }
    }
}

impl fmt::Display for MeasureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeline => write!(f, "timeline"),
            Self::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Estimated leak rate and the verdict against the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Estimated memory retained per repeat, in KB.
    pub leak_size_kb: f64,
    /// Whether `leak_size_kb` exceeds the threshold.
    pub is_leak: bool,
}

impl Classification {
    fn against(leak_size_kb: f64, threshold_kb: f64) -> Self {
        Self {
            leak_size_kb,
            is_leak: leak_size_kb > threshold_kb,
        }
    }
}

/// Node bytes of a timeline split by repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineBuckets {
    /// Bytes of nodes that existed before tracking started.
    pub pre_tracking_bytes: u64,
    /// Bytes attributed to each repeat, in order, including the warm-up and
    /// drain buckets.
    pub buckets: Vec<u64>,
    /// Bytes of nodes newer than the last sample checkpoint.
    pub unassigned_bytes: u64,
}

impl TimelineBuckets {
    /// Per-repeat sizes in KB with the first (warm-up) and last (drain)
    /// buckets discarded.
    #[must_use]
    pub fn measured_steps_kb(&self) -> Vec<f64> {
        let end = self.buckets.len().saturating_sub(1);
        self.buckets
            .get(1..end)
            .unwrap_or_default()
            .iter()
            .map(|bytes| *bytes as f64 / BYTES_PER_KB)
            .collect()
    }
}

/// Result of sizing one artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum LeakSize {
    /// Timeline: KB allocated and still alive per measured repeat.
    PerStep(Vec<f64>),
    /// Snapshot: total live KB.
    Total(f64),
}

/// Split a timeline's nodes into per-repeat buckets.
///
/// Nodes are walked in ascending id order. For each sample, the step index
/// advances while the sample's timestamp lies beyond the cumulative duration
/// of the steps so far; then every not-yet-consumed node with
/// `id <= last_assigned_id` is added to the current step. Nodes at or below
/// the first sample's id predate tracking and are not attributed to any step.
///
/// # Errors
///
/// Returns `Error::InsufficientSteps` if fewer than five durations are given.
pub fn bucket_timeline(
    profile: &ParsedHeapProfile,
    step_durations: &[Duration],
) -> Result<TimelineBuckets> {
    if step_durations.len() < MIN_TIMELINE_STEPS {
        return Err(Error::InsufficientSteps {
            required: MIN_TIMELINE_STEPS,
            actual: step_durations.len(),
        });
    }

    let mut nodes = profile
        .nodes()
        .iter()
        .map(|(id, size)| (*id, *size))
        .peekable();

    let Some(first) = profile.samples().first() else {
        return Ok(TimelineBuckets {
            unassigned_bytes: nodes.map(|(_, size)| size).fold(0, u64::saturating_add),
            ..TimelineBuckets::default()
        });
    };

    let mut pre_tracking_bytes = 0_u64;
    while let Some((_, size)) = nodes.next_if(|(id, _)| *id <= first.last_assigned_id) {
        pre_tracking_bytes = pre_tracking_bytes.saturating_add(size);
    }

    // boundaries[k] is the cumulative duration of steps 0..=k, in microseconds
    let boundaries = step_durations
        .iter()
        .scan(0_u128, |elapsed, step| {
            *elapsed = elapsed.saturating_add(step.as_micros());
            Some(*elapsed)
        })
        .collect::<Vec<_>>();

    let mut buckets = vec![0_u64];
    for sample in profile.samples() {
        let timestamp = u128::from(sample.timestamp_us);
        while buckets.len() < step_durations.len()
            && boundaries
                .get(buckets.len().saturating_sub(1))
                .is_some_and(|boundary| timestamp > *boundary)
        {
            buckets.push(0);
        }

        if let Some(current) = buckets.last_mut() {
            while let Some((_, size)) = nodes.next_if(|(id, _)| *id <= sample.last_assigned_id) {
                *current = current.saturating_add(size);
            }
        }
    }

    let unassigned_bytes = nodes.map(|(_, size)| size).fold(0, u64::saturating_add);

    debug!(
        buckets = ?buckets,
        pre_tracking_bytes,
        unassigned_bytes,
        "Bucketed heap timeline"
    );

    Ok(TimelineBuckets {
        pre_tracking_bytes,
        buckets,
        unassigned_bytes,
    })
}

/// Size one artifact: per-step KB for a timeline, total KB for a snapshot.
///
/// `step_durations` is only consulted for timelines.
///
/// # Errors
///
/// Returns `Error::InsufficientSteps` for a timeline with fewer than five
/// step durations.
pub fn leak_size(profile: &ParsedHeapProfile, step_durations: &[Duration]) -> Result<LeakSize> {
    if profile.is_timeline() {
        let steps = bucket_timeline(profile, step_durations)?.measured_steps_kb();
        debug!(steps = ?steps, "Timeline result (KB/step)");
        Ok(LeakSize::PerStep(steps))
    } else {
        let total = snapshot_size_kb(profile);
        debug!(total_kb = total, "Snapshot result (KB)");
        Ok(LeakSize::Total(total))
    }
}

/// Total self size of every node, in KB.
#[must_use]
pub fn snapshot_size_kb(profile: &ParsedHeapProfile) -> f64 {
    profile.total_self_size() as f64 / BYTES_PER_KB
}

/// Classify per-step timeline sizes with a trimmed low-mean.
///
/// The `steps / 2 + 1` smallest values (capped at the number of values) are
/// averaged and compared with `threshold_kb`.
///
/// # Errors
///
/// Returns `Error::InsufficientResults` if fewer than two values are given.
pub fn check_leak_with_timeline(
    steps: usize,
    results: &[f64],
    threshold_kb: f64,
) -> Result<Classification> {
    if results.len() < MIN_RESULTS {
        return Err(Error::InsufficientResults {
            actual: results.len(),
        });
    }

    let keep = (steps / 2).saturating_add(1).min(results.len());
    let low_sum: f64 = results
        .iter()
        .copied()
        .sorted_by(f64::total_cmp)
        .take(keep)
        .sum();

    Ok(Classification::against(low_sum / keep as f64, threshold_kb))
}

/// Classify per-repeat snapshot totals by the slope of their least-squares
/// line against the 1-based repeat index.
///
/// # Errors
///
/// Returns `Error::InsufficientResults` if fewer than two values are given.
pub fn check_leak_with_snapshots(results: &[f64], threshold_kb: f64) -> Result<Classification> {
    if results.len() < MIN_RESULTS {
        return Err(Error::InsufficientResults {
            actual: results.len(),
        });
    }

    let n = results.len() as f64;
    let (sx, sxx, sy, sxy) = results.iter().enumerate().fold(
        (0.0, 0.0, 0.0, 0.0),
        |(sx, sxx, sy, sxy), (i, y)| {
            let x = (i + 1) as f64;
            (sx + x, sxx + x * x, sy + y, sxy + x * y)
        },
    );
    let slope = n.mul_add(sxy, -(sx * sy)) / n.mul_add(sxx, -(sx * sx));

    Ok(Classification::against(slope, threshold_kb))
}
