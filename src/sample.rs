//! WSS samples and the sinks that consume them.
//!
//! The estimator emits a [`Sample`] every `report_interval / time_divisor`
//! references.  A sink must never block the producer for long: samples are
//! observability output, and losing one is better than stalling a put.
//!
//! # Example
//! ```
//! use cuki::{CukiBuilder, Sample};
//!
//! let est: cuki::Estimator<u64> = CukiBuilder::new(1 << 10)
//!     .report_interval(2)
//!     .sample_sink(|s: Sample| println!("{s}"))
//!     .build();
//! est.put(1, 100);
//! est.put(2, 50); // prints "2,150"
//! ```

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

/// One working-set observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Reference count at the moment of sampling.
    pub references: u64,
    /// Estimated distinct bytes in the window at that moment.
    pub wss_bytes: u64,
}

/// The line-oriented record format: `reference_index,wss_bytes`.
impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.references, self.wss_bytes)
    }
}

// ---------------------------------------------------------------------------
// SampleSink trait
// ---------------------------------------------------------------------------

/// A consumer of WSS samples.
///
/// Called synchronously from whichever producer thread crosses the report
/// boundary, so implementations should be quick and must not call back into
/// the estimator.
pub trait SampleSink: Send + Sync + 'static {
    fn on_sample(&self, sample: Sample);
}

impl<S: SampleSink> SampleSink for Arc<S> {
    fn on_sample(&self, sample: Sample) {
        (**self).on_sample(sample)
    }
}

/// A [`SampleSink`] backed by a closure.
///
/// Created via [`CukiBuilder::sample_sink`](crate::CukiBuilder::sample_sink).
pub struct FnSink<F>(pub F);

impl<F: Fn(Sample) + Send + Sync + 'static> SampleSink for FnSink<F> {
    fn on_sample(&self, sample: Sample) {
        (self.0)(sample)
    }
}

// ---------------------------------------------------------------------------
// WriterSink
// ---------------------------------------------------------------------------

/// Writes one `reference_index,wss_bytes` line per sample to any
/// [`std::io::Write`].
///
/// Write errors are swallowed — sampling must not fail the producer.
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send + 'static> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        WriterSink {
            writer: Mutex::new(writer),
        }
    }

    /// Consumes the sink and returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send + 'static> SampleSink for WriterSink<W> {
    fn on_sample(&self, sample: Sample) {
        let mut writer = self.writer.lock();
        let _ = writeln!(writer, "{sample}");
    }
}

// ---------------------------------------------------------------------------
// QueueSink
// ---------------------------------------------------------------------------

/// A bounded sample buffer for a polling consumer.
///
/// When the queue is full the oldest sample is displaced, so the consumer
/// always sees the most recent window of observations.  Share it with the
/// builder through an `Arc`:
///
/// ```
/// use cuki::sample::QueueSink;
/// use cuki::CukiBuilder;
/// use std::sync::Arc;
///
/// let sink = Arc::new(QueueSink::new(128));
/// let est: cuki::Estimator<u64> = CukiBuilder::new(1 << 10)
///     .report_interval(1)
///     .sample_sink_impl(Arc::clone(&sink))
///     .build();
/// est.put(7, 42);
/// assert_eq!(sink.pop().unwrap().wss_bytes, 42);
/// ```
pub struct QueueSink {
    queue: ArrayQueue<Sample>,
}

impl QueueSink {
    pub fn new(capacity: usize) -> Self {
        QueueSink {
            queue: ArrayQueue::new(capacity),
        }
    }

    pub fn pop(&self) -> Option<Sample> {
        self.queue.pop()
    }

    /// Drains all buffered samples into `out`, oldest first.
    pub fn drain(&self, out: &mut Vec<Sample>) {
        while let Some(sample) = self.queue.pop() {
            out.push(sample);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl SampleSink for QueueSink {
    fn on_sample(&self, sample: Sample) {
        self.queue.force_push(sample);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
