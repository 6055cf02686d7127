use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::Mutex;

use crate::builder::CukiBuilder;
use crate::filter::aging::{self, AgingMode};
use crate::filter::{ClockCuckooFilter, FilterConfig, PutOutcome};
use crate::irr::IrrTracker;
use crate::metrics::stats::{Metrics, StatsCounter};
use crate::sample::{Sample, SampleSink};

// ---------------------------------------------------------------------------
// Estimator interior
// ---------------------------------------------------------------------------

/// Shared interior of an [`Estimator`].
pub(crate) struct Inner<K> {
    pub(crate) filter: ClockCuckooFilter,
    aging: AgingMode,
    /// References between windowed sweep events.
    aging_stride: u64,
    /// References between reconciliation passes.
    report_interval: u64,
    /// References between samples: `report_interval / time_divisor`.
    sample_every: u64,
    references: AtomicU64,
    num_scopes: usize,
    stats: StatsCounter,
    irr: Option<Mutex<IrrTracker<K>>>,
    /// `None` if the user didn't register a sink.
    sink: Option<Box<dyn SampleSink>>,
    maintain_lock: Mutex<()>,
}

// ---------------------------------------------------------------------------
// Estimator handle
// ---------------------------------------------------------------------------

/// A concurrent sliding-window working-set-size estimator.
///
/// Each `put(key, size)` is one reference to `size` distinct bytes under
/// `key`; [`wss`](Estimator::wss) reports the estimated total of distinct
/// bytes touched within the configured window.
///
/// # Example
/// ```
/// use cuki::CukiBuilder;
///
/// let est: cuki::Estimator<&str> = CukiBuilder::new(1 << 10).build();
/// est.put("a", 5);
/// est.put("b", 3);
/// assert_eq!(est.wss(), 8);
/// est.put("a", 5); // repeated touch adds nothing
/// assert_eq!(est.wss(), 8);
/// ```
pub struct Estimator<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for Estimator<K> {
    fn clone(&self) -> Self {
        Estimator {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Estimator<K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(b: CukiBuilder<K>) -> Self {
        let clock_max = (1u64 << b.clock_bits) - 1;
        let filter = ClockCuckooFilter::new(FilterConfig {
            num_buckets: b.num_buckets,
            tags_per_bucket: b.tags_per_bucket,
            tag_bits: b.tag_bits,
            size_bits: b.size_bits,
            clock_bits: b.clock_bits,
            scope_bits: b.scope_bits,
            num_scopes: b.num_scopes,
            lock_number: b.lock_number,
            encoding: b.size_encoding,
            max_kicks: b.max_kicks,
            aging: b.aging,
            hasher: b.hasher.unwrap_or_else(RandomState::new),
        });
        Estimator {
            inner: Arc::new(Inner {
                filter,
                aging: b.aging,
                aging_stride: aging::stride_for(b.window_size, clock_max),
                report_interval: b.report_interval,
                sample_every: (b.report_interval / b.time_divisor).max(1),
                references: AtomicU64::new(0),
                num_scopes: b.num_scopes,
                stats: StatsCounter::new(),
                irr: b.track_irr.then(|| Mutex::new(IrrTracker::new())),
                sink: b.sink,
                maintain_lock: Mutex::new(()),
            }),
        }
    }

    /// Returns a [`CukiBuilder`] for constructing a new estimator.
    pub fn builder(num_buckets: usize) -> CukiBuilder<K> {
        CukiBuilder::new(num_buckets)
    }

    // -----------------------------------------------------------------------
    // Hot path: put
    // -----------------------------------------------------------------------

    /// Records one reference of `size` bytes under `key` in scope 0.
    pub fn put(&self, key: K, size: u64) -> PutOutcome {
        self.put_in_scope(key, size, 0)
    }

    /// Records one reference of `size` bytes under `key` in `scope`.
    pub fn put_in_scope(&self, key: K, size: u64, scope: u8) -> PutOutcome {
        assert!(size > 0, "size must be positive");
        if self.inner.num_scopes > 0 {
            assert!(
                (scope as usize) < self.inner.num_scopes,
                "scope {} out of range (num_scopes = {})",
                scope,
                self.inner.num_scopes
            );
        } else {
            assert_eq!(scope, 0, "scopes are not configured");
        }

        let n = self.inner.references.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.stats.record_reference();

        let outcome = self.inner.filter.put(&key, size, scope as u64);
        self.inner.stats.record_outcome(outcome);

        if let Some(irr) = &self.inner.irr {
            irr.lock().record(key, n);
        }

        if self.inner.aging == AgingMode::Windowed && n % self.inner.aging_stride == 0 {
            self.inner.filter.sweep();
        }
        if n % self.inner.sample_every == 0 {
            self.emit_sample(n);
        }
        if n % self.inner.report_interval == 0 {
            self.try_reconcile();
        }

        outcome
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Estimated distinct bytes touched within the window.
    pub fn wss(&self) -> u64 {
        self.inner.filter.wss()
    }

    /// Estimated distinct bytes attributed to `scope`.
    pub fn wss_of_scope(&self, scope: u8) -> u64 {
        assert!(
            (scope as usize) < self.inner.num_scopes,
            "scope {} out of range (num_scopes = {})",
            scope,
            self.inner.num_scopes
        );
        self.inner.filter.wss_of_scope(scope as usize)
    }

    /// Decoded size of `key`, or `None` if it is absent (never referenced,
    /// aged out, or displaced out of the table).
    pub fn size_of(&self, key: &K) -> Option<u64> {
        self.inner.filter.size_of(key)
    }

    /// References processed so far.
    pub fn references(&self) -> u64 {
        self.inner.references.load(Ordering::Relaxed)
    }

    /// Number of live slots.  O(table).
    pub fn entry_count(&self) -> usize {
        self.inner.filter.entry_count()
    }

    pub fn stats(&self) -> Metrics {
        self.inner.stats.snapshot(self.inner.filter.aged_out())
    }

    /// The log₂-bucketed inter-reference-recency histogram, or `None` when
    /// IRR tracking was not enabled.
    pub fn irr_histogram(&self) -> Option<Vec<u64>> {
        self.inner.irr.as_ref().map(|irr| irr.lock().histogram())
    }

    /// Distinct keys seen by the IRR tracker, or `None` when IRR tracking
    /// was not enabled.
    pub fn irr_tracked_keys(&self) -> Option<usize> {
        self.inner.irr.as_ref().map(|irr| irr.lock().tracked())
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Forces a reconciliation pass: duplicate slots are cleared and the
    /// running sums are recomputed from the table.
    pub fn reconcile(&self) {
        let _guard = self.inner.maintain_lock.lock();
        self.inner.filter.reconcile();
        self.inner.stats.record_reconciliation();
    }

    fn try_reconcile(&self) {
        let Some(_guard) = self.inner.maintain_lock.try_lock() else {
            return;
        };
        self.inner.filter.reconcile();
        self.inner.stats.record_reconciliation();
    }

    /// Emits a final sample at the current reference count.  Call once the
    /// input stream is exhausted.
    pub fn finish(&self) {
        self.emit_sample(self.references());
    }

    fn emit_sample(&self, references: u64) {
        if let Some(sink) = &self.inner.sink {
            sink.on_sample(Sample {
                references,
                wss_bytes: self.inner.filter.wss(),
            });
        }
    }
}
