//! Aggregator checkpoints.
//!
//! A checkpoint is a JSON document holding the scenario, a timestamp and
//! every bucket keyed by `"<prompt_version>\x1f<provider>"`. It lets a long
//! sweep be reported on later, or resumed without repeating provider calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::aggregator::{AggregateBucket, ConsistencyAggregator};
use crate::record::BucketKey;
use crate::scenario::Scenario;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Failed to access checkpoint file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse checkpoint JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid bucket key in checkpoint: {0:?}")]
    InvalidKey(String),

    #[error("Checkpoint does not match scenario: {0}")]
    Incompatible(String),

    #[error("Corrupt bucket {key}: {reason}")]
    CorruptBucket { key: String, reason: String },
}

/// Serialized aggregator state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub scenario: Scenario,
    pub saved_at: DateTime<Utc>,
    pub buckets: BTreeMap<String, AggregateBucket>,
}

impl Checkpoint {
    /// Capture the current state of an aggregator.
    pub fn capture(aggregator: &ConsistencyAggregator) -> Self {
        Self {
            scenario: aggregator.scenario().clone(),
            saved_at: Utc::now(),
            buckets: aggregator
                .snapshot()
                .into_iter()
                .map(|(key, bucket)| (key.checkpoint_key(), bucket))
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), CheckpointError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Number of records folded into the saved buckets.
    pub fn observed_count(&self) -> u64 {
        self.buckets
            .values()
            .map(|b| u64::from(b.iterations_seen))
            .sum()
    }

    /// Rebuild an aggregator for `scenario`.
    ///
    /// The checkpoint's own scenario must agree with `scenario` on the
    /// utterance, iteration count and expected parameters; buckets are then
    /// checked one by one.
    pub fn into_aggregator(self, scenario: &Scenario) -> Result<ConsistencyAggregator, CheckpointError> {
        if self.scenario.utterance != scenario.utterance {
            return Err(CheckpointError::Incompatible(
                "checkpoint was recorded for a different utterance".to_string(),
            ));
        }
        if self.scenario.iterations_per_config != scenario.iterations_per_config {
            return Err(CheckpointError::Incompatible(format!(
                "checkpoint has {} iterations per config, scenario has {}",
                self.scenario.iterations_per_config, scenario.iterations_per_config
            )));
        }
        if self.scenario.expected_parameters != scenario.expected_parameters {
            return Err(CheckpointError::Incompatible(
                "checkpoint tracks different expected parameters".to_string(),
            ));
        }

        let mut buckets = BTreeMap::new();
        for (flat, bucket) in self.buckets {
            let key = BucketKey::from_checkpoint_key(&flat)
                .ok_or_else(|| CheckpointError::InvalidKey(flat.clone()))?;
            buckets.insert(key, bucket);
        }

        ConsistencyAggregator::restore(scenario.clone(), buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordKey, ResponseRecord};

    fn scenario() -> Scenario {
        Scenario::from_yaml(
            r#"
utterance: "Analyze job fit for John Smith"
expected_parameters: [person_name]
iterations_per_config: 5
prompt_versions: [V1]
providers: [Cohere, Claude]
"#,
        )
        .unwrap()
    }

    fn filled() -> ConsistencyAggregator {
        let agg = ConsistencyAggregator::new(scenario());
        for i in 0..3 {
            agg.observe(
                ResponseRecord::new(RecordKey::new("V1", "Cohere", i))
                    .with_endpoint(Some("analyze_job_fit"))
                    .with_parameter("person_name", Some("John Smith"))
                    .with_latency(100 + u64::from(i)),
            )
            .unwrap();
        }
        agg
    }

    #[test]
    fn test_capture_uses_flat_keys() {
        let checkpoint = Checkpoint::capture(&filled());
        assert_eq!(
            checkpoint.buckets.keys().collect::<Vec<_>>(),
            vec!["V1\u{1f}Cohere"]
        );
        assert_eq!(checkpoint.observed_count(), 3);

        let json = checkpoint.to_json().unwrap();
        assert!(json.contains("V1\\u001fCohere"));
    }

    #[test]
    fn test_json_round_trip_restores_state() {
        let agg = filled();
        let json = Checkpoint::capture(&agg).to_json().unwrap();

        let restored = Checkpoint::from_json(&json)
            .unwrap()
            .into_aggregator(&scenario())
            .unwrap();
        assert_eq!(restored.snapshot(), agg.snapshot());
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("routebench-ckpt-{}.json", std::process::id()));
        Checkpoint::capture(&filled()).write_to(&path).unwrap();
        let loaded = Checkpoint::read_from(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded.observed_count(), 3);
    }

    #[test]
    fn test_invalid_key_rejected() {
        let mut checkpoint = Checkpoint::capture(&filled());
        let bucket = checkpoint.buckets.remove("V1\u{1f}Cohere").unwrap();
        checkpoint.buckets.insert("V1/Cohere".to_string(), bucket);

        assert!(matches!(
            checkpoint.into_aggregator(&scenario()),
            Err(CheckpointError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_corrupt_bucket_rejected() {
        let mut checkpoint = Checkpoint::capture(&filled());
        if let Some(bucket) = checkpoint.buckets.get_mut("V1\u{1f}Cohere") {
            bucket.iterations_seen = 4;
        }

        assert!(matches!(
            checkpoint.into_aggregator(&scenario()),
            Err(CheckpointError::CorruptBucket { .. })
        ));
    }

    #[test]
    fn test_different_scenario_rejected() {
        let checkpoint = Checkpoint::capture(&filled());
        let mut other = scenario();
        other.utterance = "Something else".to_string();

        assert!(matches!(
            checkpoint.into_aggregator(&other),
            Err(CheckpointError::Incompatible(_))
        ));
    }
}
