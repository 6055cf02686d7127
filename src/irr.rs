//! Inter-reference recency tracking.
//!
//! IRR of an access is the number of references since the previous access
//! of the same key.  The tracker pairs each key with its last-seen
//! reference index and folds each delta into a log₂-scale histogram:
//! bucket `k` counts recencies in `[2^k, 2^(k+1))`.

use ahash::AHashMap;
use std::hash::Hash;

/// Number of histogram buckets; covers every possible `u64` delta.
const BUCKETS: usize = 64;

pub(crate) struct IrrTracker<K> {
    /// Last-seen reference index per key.
    last_seen: AHashMap<K, u64>,
    histogram: [u64; BUCKETS],
}

impl<K: Hash + Eq> IrrTracker<K> {
    pub fn new() -> Self {
        IrrTracker {
            last_seen: AHashMap::new(),
            histogram: [0; BUCKETS],
        }
    }

    /// Records an access of `key` at `reference_ix` (1-based).
    ///
    /// Concurrent producers can deliver indices slightly out of order; a
    /// non-positive delta is an effectively-simultaneous re-reference and
    /// is not histogrammed.
    pub fn record(&mut self, key: K, reference_ix: u64) {
        if let Some(prev) = self.last_seen.insert(key, reference_ix) {
            if reference_ix > prev {
                let delta = reference_ix - prev;
                let bucket = 63 - delta.leading_zeros() as usize;
                self.histogram[bucket] += 1;
            }
        }
    }

    pub fn histogram(&self) -> Vec<u64> {
        self.histogram.to_vec()
    }

    /// Number of distinct keys seen so far.
    pub fn tracked(&self) -> usize {
        self.last_seen.len()
    }
}

impl<K: Hash + Eq> Default for IrrTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_access_records_nothing() {
        let mut t = IrrTracker::new();
        t.record("a", 1);
        assert!(t.histogram().iter().all(|&c| c == 0));
        assert_eq!(t.tracked(), 1);
    }

    #[test]
    fn deltas_land_in_log2_buckets() {
        let mut t = IrrTracker::new();
        t.record("a", 1);
        t.record("a", 2); // delta 1 -> bucket 0
        t.record("a", 4); // delta 2 -> bucket 1
        t.record("a", 11); // delta 7 -> bucket 2
        t.record("a", 19); // delta 8 -> bucket 3

        let h = t.histogram();
        assert_eq!(h[0], 1);
        assert_eq!(h[1], 1);
        assert_eq!(h[2], 1);
        assert_eq!(h[3], 1);
        assert_eq!(h[4..].iter().sum::<u64>(), 0);
    }

    #[test]
    fn keys_are_tracked_independently() {
        let mut t = IrrTracker::new();
        t.record(1u64, 1);
        t.record(2u64, 2);
        t.record(1u64, 5); // delta 4 -> bucket 2
        t.record(2u64, 6); // delta 4 -> bucket 2
        assert_eq!(t.histogram()[2], 2);
        assert_eq!(t.tracked(), 2);
    }
}
