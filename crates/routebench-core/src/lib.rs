//! # routebench-core
//!
//! Deterministic consistency engine for multi-provider LLM routing benchmarks.
//!
//! A benchmark sends one utterance, under several prompt versions, to several
//! providers, many times over. This crate turns the replies into stability
//! metrics:
//!
//! - [`normalizer`] maps a raw reply into one canonical record shape
//! - [`aggregator`] folds records into per-(version, provider) buckets
//! - [`reducer`] turns buckets into the reportable table
//!
//! ## Key Guarantees
//!
//! 1. **No provider I/O**: everything here is pure computation
//! 2. **Order-independent across buckets**: interleaving records for different
//!    buckets never changes the report
//! 3. **Never double-counts**: duplicate (version, provider, iteration) records are rejected
//! 4. **Never divides by zero**: empty buckets reduce to "no data" rows
//!
//! ## Example
//!
//! ```rust,ignore
//! use routebench_core::{ConsistencyAggregator, MetricsReducer, Scenario};
//!
//! let scenario = Scenario::from_file("scenario.yaml")?;
//! let aggregator = ConsistencyAggregator::new(scenario.clone());
//! for record in records {
//!     let _ = aggregator.observe(record);
//! }
//! let report = MetricsReducer::new(&scenario).reduce_all(&aggregator);
//! ```

pub mod aggregator;
pub mod checkpoint;
pub mod normalizer;
pub mod record;
pub mod reducer;
pub mod scenario;

pub use aggregator::{AggregateBucket, ConsistencyAggregator, ObserveError, ParameterStats, Tally};
pub use checkpoint::{Checkpoint, CheckpointError};
pub use normalizer::{Capabilities, ExtractionNormalizer, RawReply};
pub use record::{BucketKey, ErrorKind, RecordError, RecordKey, ResponseRecord, NO_ENDPOINT};
pub use reducer::{
    EndpointShare, MetricsReducer, MetricsRow, ParameterMetrics, ParameterStatus, Report,
    RowStatus, VersionReport,
};
pub use scenario::{EndpointSpec, Scenario, ScenarioError};

/// Aggregate a finished batch of records and reduce it in one call.
///
/// Rejected records are returned alongside the report rather than aborting.
pub fn aggregate(
    scenario: &Scenario,
    records: impl IntoIterator<Item = ResponseRecord>,
) -> (Report, Vec<ObserveError>) {
    let aggregator = ConsistencyAggregator::new(scenario.clone());
    let rejected = records
        .into_iter()
        .filter_map(|record| aggregator.observe(record).err())
        .collect();
    let report = MetricsReducer::new(scenario).reduce_all(&aggregator);
    (report, rejected)
}
