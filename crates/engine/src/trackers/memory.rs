use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Latest known size of one memory fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRecord {
    pub fragment_id: u64,
    pub size_bytes: u64,
    pub observed_at: Instant,
}

/// Keeps the latest reported size of every heap fragment.
///
/// Updates for a known fragment replace its size and move its timestamp to
/// now; they never accumulate. Records are only dropped by [`reset`].
///
/// [`reset`]: MemoryAllocationTracker::reset
#[derive(Debug, Default)]
pub struct MemoryAllocationTracker {
    fragments: Mutex<HashMap<u64, FragmentRecord>>,
}

impl MemoryAllocationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a batch of `(fragment_id, size_bytes)` updates observed now.
    pub fn on_allocation_update(&self, batch: impl IntoIterator<Item = (u64, u64)>) {
        let now = Instant::now();
        let mut fragments = self.fragments.lock();
        for (fragment_id, size_bytes) in batch {
            fragments.insert(
                fragment_id,
                FragmentRecord {
                    fragment_id,
                    size_bytes,
                    observed_at: now,
                },
            );
        }
    }

    /// Sum of sizes of fragments observed in `(now - to, now - from]`.
    #[must_use]
    pub fn sum_in_window(&self, from: Duration, to: Duration) -> u64 {
        let now = Instant::now();
        self.fragments
            .lock()
            .values()
            .filter(|record| {
                let age = now.saturating_duration_since(record.observed_at);
                age >= from && age < to
            })
            .map(|record| record.size_bytes)
            .fold(0, u64::saturating_add)
    }

    /// Number of distinct fragments tracked.
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.fragments.lock().len()
    }

    /// Drop every fragment record.
    pub fn reset(&self) {
        self.fragments.lock().clear();
    }
}
