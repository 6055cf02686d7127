use std::hash::Hash;
use std::marker::PhantomData;

use ahash::RandomState;

use crate::estimator::Estimator;
use crate::filter::aging::AgingMode;
use crate::filter::SizeEncoding;
use crate::sample::{FnSink, Sample, SampleSink};

/// Builder for configuring and constructing an [`Estimator`].
///
/// # Example
/// ```
/// use cuki::CukiBuilder;
///
/// let est: cuki::Estimator<String> = CukiBuilder::new(1 << 12)
///     .window(1 << 16)
///     .clock_bits(2)
///     .build();
/// est.put("object-1".to_string(), 4096);
/// assert_eq!(est.wss(), 4096);
/// ```
pub struct CukiBuilder<K> {
    pub(crate) num_buckets: usize,
    pub(crate) tags_per_bucket: usize,
    pub(crate) tag_bits: u32,
    pub(crate) size_bits: u32,
    pub(crate) size_encoding: SizeEncoding,
    pub(crate) clock_bits: u32,
    pub(crate) scope_bits: u32,
    pub(crate) num_scopes: usize,
    pub(crate) window_size: u64,
    pub(crate) lock_number: usize,
    pub(crate) max_kicks: u32,
    pub(crate) aging: AgingMode,
    pub(crate) report_interval: u64,
    pub(crate) time_divisor: u64,
    pub(crate) track_irr: bool,
    pub(crate) sink: Option<Box<dyn SampleSink>>,
    pub(crate) hasher: Option<RandomState>,
    _marker: PhantomData<fn(K)>,
}

impl<K: 'static> CukiBuilder<K> {
    pub fn new(num_buckets: usize) -> Self {
        assert!(
            num_buckets > 0 && num_buckets.is_power_of_two(),
            "num_buckets must be a power of two"
        );
        CukiBuilder {
            num_buckets,
            tags_per_bucket: 4,
            tag_bits: 8,
            size_bits: 32,
            size_encoding: SizeEncoding::Linear,
            clock_bits: 3,
            scope_bits: 0,
            num_scopes: 0,
            window_size: 1 << 20,
            lock_number: 64,
            max_kicks: 500,
            aging: AgingMode::Windowed,
            report_interval: 1 << 16,
            time_divisor: 1,
            track_irr: false,
            sink: None,
            hasher: None,
            _marker: PhantomData,
        }
    }

    /// Set the number of slots per bucket (default: 4).
    pub fn tags_per_bucket(mut self, n: usize) -> Self {
        assert!((1..=16).contains(&n), "tags_per_bucket must be in [1, 16]");
        self.tags_per_bucket = n;
        self
    }

    /// Set the fingerprint width in bits (default: 8).
    pub fn tag_bits(mut self, bits: u32) -> Self {
        assert!((1..=32).contains(&bits), "tag_bits must be in [1, 32]");
        self.tag_bits = bits;
        self
    }

    /// Store exact sizes in a `bits`-wide field, saturating at `2^bits − 1`.
    pub fn linear_sizes(mut self, bits: u32) -> Self {
        assert!((1..=32).contains(&bits), "size_bits must be in [1, 32]");
        self.size_bits = bits;
        self.size_encoding = SizeEncoding::Linear;
        self
    }

    /// Store sizes quantized to multiples of `2^shift` in a `bits`-wide
    /// field.  A live slot never decodes to zero bytes.
    pub fn bucketed_sizes(mut self, bits: u32, shift: u32) -> Self {
        assert!((1..=32).contains(&bits), "size_bits must be in [1, 32]");
        self.size_bits = bits;
        self.size_encoding = SizeEncoding::Bucket { shift };
        self
    }

    /// Set the clock width in bits; higher means finer aging resolution
    /// (default: 3).
    pub fn clock_bits(mut self, bits: u32) -> Self {
        assert!((1..=8).contains(&bits), "clock_bits must be in [1, 8]");
        self.clock_bits = bits;
        self
    }

    /// Partition the estimate into `num_scopes` independently-summed scopes
    /// carried in a `bits`-wide slot field.
    pub fn scopes(mut self, bits: u32, num_scopes: usize) -> Self {
        assert!((1..=8).contains(&bits), "scope_bits must be in [1, 8]");
        assert!(
            num_scopes >= 1 && num_scopes <= 1usize << bits,
            "num_scopes must fit in scope_bits"
        );
        self.scope_bits = bits;
        self.num_scopes = num_scopes;
        self
    }

    /// Set the observation window in references (default: 2^20).
    pub fn window(mut self, references: u64) -> Self {
        assert!(references > 0, "window must be at least one reference");
        self.window_size = references;
        self
    }

    /// Set the lock-stripe count (must be a power of two; default: 64).
    pub fn lock_number(mut self, n: usize) -> Self {
        assert!(
            n > 0 && n.is_power_of_two(),
            "lock_number must be a power of two"
        );
        self.lock_number = n;
        self
    }

    /// Bound the cuckoo displacement walk (default: 500).
    pub fn max_kicks(mut self, kicks: u32) -> Self {
        assert!(kicks >= 1, "max_kicks must be at least 1");
        self.max_kicks = kicks;
        self
    }

    /// Select the aging mode (default: [`AgingMode::Windowed`]).
    pub fn aging(mut self, mode: AgingMode) -> Self {
        self.aging = mode;
        self
    }

    /// Emit a sample and reconcile the running sums every `references`
    /// references (default: 2^16).
    pub fn report_interval(mut self, references: u64) -> Self {
        assert!(references >= 1, "report_interval must be at least 1");
        self.report_interval = references;
        self
    }

    /// Emit `divisor` samples per report interval (default: 1).
    pub fn time_divisor(mut self, divisor: u64) -> Self {
        assert!(divisor >= 1, "time_divisor must be at least 1");
        self.time_divisor = divisor;
        self
    }

    /// Track the inter-reference-recency histogram alongside the estimate.
    pub fn track_irr(mut self) -> Self {
        self.track_irr = true;
        self
    }

    /// Register a sample sink closure.
    ///
    /// The closure runs **synchronously on the putting thread** each time
    /// the report boundary is crossed.  Do not call estimator methods from
    /// within it.
    pub fn sample_sink<F>(mut self, f: F) -> Self
    where
        F: Fn(Sample) + Send + Sync + 'static,
    {
        self.sink = Some(Box::new(FnSink(f)));
        self
    }

    /// Register a sample sink via the [`SampleSink`] trait.
    pub fn sample_sink_impl<S: SampleSink>(mut self, sink: S) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Supply the hash state, e.g. for reproducible placement in tests and
    /// trace replays.
    pub fn hasher(mut self, hasher: RandomState) -> Self {
        self.hasher = Some(hasher);
        self
    }
}

impl<K> CukiBuilder<K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    pub fn build(self) -> Estimator<K> {
        if let SizeEncoding::Bucket { shift } = self.size_encoding {
            assert!(
                self.size_bits + shift <= 32,
                "size_bits + size_bucket_bits must not exceed 32"
            );
        }
        assert!(
            self.time_divisor <= self.report_interval,
            "time_divisor must not exceed report_interval"
        );
        Estimator::new(self)
    }
}
