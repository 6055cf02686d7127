mod builder;
mod estimator;
mod filter;
mod irr;
mod metrics;
pub mod sample;

pub use builder::CukiBuilder;
pub use estimator::Estimator;
pub use filter::aging::AgingMode;
pub use filter::{PutOutcome, SizeEncoding};
pub use metrics::stats::Metrics;
pub use sample::{Sample, SampleSink};
