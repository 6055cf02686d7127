use std::sync::atomic::{AtomicU64, Ordering};

use crate::filter::PutOutcome;

/// Atomic counters updated on every estimator operation.
pub struct StatsCounter {
    references: AtomicU64,
    inserted: AtomicU64,
    refreshed: AtomicU64,
    displaced: AtomicU64,
    dropped: AtomicU64,
    reconciliations: AtomicU64,
}

impl StatsCounter {
    pub fn new() -> Self {
        StatsCounter {
            references: AtomicU64::new(0),
            inserted: AtomicU64::new(0),
            refreshed: AtomicU64::new(0),
            displaced: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            reconciliations: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_reference(&self) {
        self.references.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_outcome(&self, outcome: PutOutcome) {
        let counter = match outcome {
            PutOutcome::Inserted => &self.inserted,
            PutOutcome::Refreshed => &self.refreshed,
            PutOutcome::Displaced => &self.displaced,
            PutOutcome::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconciliation(&self) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot.  `aged_out` comes from the filter,
    /// which counts slots freed by aging itself.
    pub fn snapshot(&self, aged_out: u64) -> Metrics {
        let references = self.references.load(Ordering::Relaxed);
        let inserted = self.inserted.load(Ordering::Relaxed);
        let refreshed = self.refreshed.load(Ordering::Relaxed);
        let displaced = self.displaced.load(Ordering::Relaxed);
        let dropped = self.dropped.load(Ordering::Relaxed);
        let total = inserted + refreshed + displaced + dropped;
        let drop_rate = if total == 0 {
            0.0_f64
        } else {
            dropped as f64 / total as f64
        };
        Metrics {
            references,
            inserted,
            refreshed,
            displaced,
            dropped,
            aged_out,
            reconciliations: self.reconciliations.load(Ordering::Relaxed),
            drop_rate,
        }
    }
}

impl Default for StatsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of estimator statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    /// Number of references processed.
    pub references: u64,
    /// Puts that filled a free slot.
    pub inserted: u64,
    /// Puts that found their key already resident.
    pub refreshed: u64,
    /// Puts placed by cuckoo displacement.
    pub displaced: u64,
    /// Puts whose displacement budget was exhausted.
    pub dropped: u64,
    /// Slots freed by aging.
    pub aged_out: u64,
    /// Reconciliation passes completed.
    pub reconciliations: u64,
    /// `dropped / (inserted + refreshed + displaced + dropped)`, or `0.0`
    /// before the first put.
    pub drop_rate: f64,
}

impl Metrics {
    pub fn put_count(&self) -> u64 {
        self.inserted + self.refreshed + self.displaced + self.dropped
    }
}
