//! Consistency aggregator.
//!
//! Folds a stream of [`ResponseRecord`]s into one [`AggregateBucket`] per
//! (prompt_version, provider). Observation is incremental and safe to call
//! from many tasks at once:
//!
//! - the bucket map sits behind a `RwLock` that is only held for lookup/insert
//! - each bucket has its own `Mutex`, so records for different buckets never
//!   contend and records for the same bucket are applied one at a time
//!
//! Buckets are independent, so the final state does not depend on how
//! observations for different buckets interleave.

mod bucket;

pub use bucket::{leader, AggregateBucket, ParameterStats, Tally};

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::record::{BucketKey, RecordKey, ResponseRecord};
use crate::scenario::Scenario;

/// Why a record was not folded into its bucket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObserveError {
    #[error("Duplicate observation for {key}")]
    DuplicateObservation { key: RecordKey },

    #[error("Iteration index out of range for {key} (iterations_per_config = {iterations})")]
    IterationOutOfRange { key: RecordKey, iterations: u32 },

    #[error("No bucket {key} in this scenario")]
    UnknownBucket { key: BucketKey },
}

type SharedBucket = Arc<Mutex<AggregateBucket>>;

/// Incremental per-bucket aggregation for one scenario.
#[derive(Debug)]
pub struct ConsistencyAggregator {
    scenario: Scenario,
    buckets: RwLock<BTreeMap<BucketKey, SharedBucket>>,
    rejected: AtomicU64,
}

impl ConsistencyAggregator {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            buckets: RwLock::new(BTreeMap::new()),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Fold one record into its bucket.
    ///
    /// Rejected records are logged at `warn` and counted; they never change
    /// any bucket.
    pub fn observe(&self, record: ResponseRecord) -> Result<(), ObserveError> {
        let key = record.bucket_key();

        let result = if self.scenario.has_bucket(&key) {
            let bucket = self.bucket_handle(&key);
            let mut guard = bucket.lock();
            guard.apply(&record)
        } else {
            Err(ObserveError::UnknownBucket { key })
        };

        if let Err(e) = &result {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(record = %record.key(), error = %e, "Observation rejected");
        }

        result
    }

    /// Get or lazily create the bucket for `key`.
    fn bucket_handle(&self, key: &BucketKey) -> SharedBucket {
        if let Some(bucket) = self.buckets.read().get(key) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(key.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(AggregateBucket::new(
                key.clone(),
                self.scenario.iterations_per_config,
                &self.scenario.expected_parameters,
            )))
        });
        Arc::clone(bucket)
    }

    /// Consistent copy of every bucket created so far, in key order.
    pub fn snapshot(&self) -> BTreeMap<BucketKey, AggregateBucket> {
        let buckets = self.buckets.read();
        buckets
            .iter()
            .map(|(key, bucket)| (key.clone(), bucket.lock().clone()))
            .collect()
    }

    /// Copy of one bucket, if it has been created.
    pub fn bucket(&self, key: &BucketKey) -> Option<AggregateBucket> {
        let buckets = self.buckets.read();
        buckets.get(key).map(|b| b.lock().clone())
    }

    pub fn iterations_seen(&self, key: &BucketKey) -> u32 {
        let buckets = self.buckets.read();
        buckets.get(key).map_or(0, |b| b.lock().iterations_seen)
    }

    /// Whether a specific iteration has already been folded in.
    pub fn has_observed(&self, key: &RecordKey) -> bool {
        let buckets = self.buckets.read();
        buckets
            .get(&key.bucket())
            .is_some_and(|b| b.lock().observed_iterations.contains(&key.iteration_index))
    }

    /// Total records accepted across all buckets.
    pub fn observed_count(&self) -> u64 {
        let buckets = self.buckets.read();
        buckets
            .values()
            .map(|b| u64::from(b.lock().iterations_seen))
            .sum()
    }

    /// Records rejected since construction (duplicates, out of range, unknown bucket).
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Rebuild an aggregator from saved buckets.
    ///
    /// Every bucket must belong to the scenario, match its iteration count and
    /// expected parameters, and satisfy the bucket invariants.
    pub fn restore(
        scenario: Scenario,
        saved: BTreeMap<BucketKey, AggregateBucket>,
    ) -> Result<Self, CheckpointError> {
        let mut buckets = BTreeMap::new();

        for (key, bucket) in saved {
            if key != bucket.key {
                return Err(CheckpointError::CorruptBucket {
                    key: key.to_string(),
                    reason: format!("bucket is labelled {}", bucket.key),
                });
            }

            if !scenario.has_bucket(&key) {
                return Err(CheckpointError::Incompatible(format!(
                    "bucket {} is not part of the scenario",
                    key
                )));
            }

            if bucket.iterations_configured != scenario.iterations_per_config {
                return Err(CheckpointError::Incompatible(format!(
                    "bucket {} was recorded with {} iterations, scenario has {}",
                    key, bucket.iterations_configured, scenario.iterations_per_config
                )));
            }

            let mut names: Vec<&String> = bucket.parameter_stats.keys().collect();
            let mut expected: Vec<&String> = scenario.expected_parameters.iter().collect();
            names.sort();
            expected.sort();
            if names != expected {
                return Err(CheckpointError::Incompatible(format!(
                    "bucket {} tracks different parameters than the scenario",
                    key
                )));
            }

            bucket
                .check_invariants()
                .map_err(|reason| CheckpointError::CorruptBucket {
                    key: key.to_string(),
                    reason,
                })?;

            buckets.insert(key, Arc::new(Mutex::new(bucket)));
        }

        tracing::debug!(buckets = buckets.len(), "Aggregator restored from checkpoint");

        Ok(Self {
            scenario,
            buckets: RwLock::new(buckets),
            rejected: AtomicU64::new(0),
        })
    }
}
