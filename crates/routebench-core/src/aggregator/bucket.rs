//! Per-(prompt_version, provider) running statistics.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::ObserveError;
use crate::record::{BucketKey, ErrorKind, ResponseRecord};

/// A counter that remembers when it was first bumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub count: u64,

    /// Bucket-local sequence number of the first observation that produced this tally
    pub first_seen: u64,
}

impl Tally {
    fn new(first_seen: u64) -> Self {
        Self { count: 0, first_seen }
    }
}

/// Bump the tally for `label`, creating it at sequence number `seq` if new.
fn bump(tallies: &mut BTreeMap<String, Tally>, label: &str, seq: u64) {
    tallies
        .entry(label.to_string())
        .or_insert_with(|| Tally::new(seq))
        .count += 1;
}

/// The tally with the highest count; ties go to the earliest first_seen.
pub fn leader(tallies: &BTreeMap<String, Tally>) -> Option<(&str, &Tally)> {
    tallies
        .iter()
        .max_by(|(_, a), (_, b)| {
            a.count
                .cmp(&b.count)
                .then_with(|| b.first_seen.cmp(&a.first_seen))
        })
        .map(|(label, tally)| (label.as_str(), tally))
}

/// Running statistics for one expected parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterStats {
    /// Observations in which the parameter was present
    pub extracted_count: u64,

    /// Literal value -> tally
    pub values: BTreeMap<String, Tally>,
}

impl ParameterStats {
    /// Most frequent literal value, ties broken by first appearance.
    pub fn most_common(&self) -> Option<(&str, &Tally)> {
        leader(&self.values)
    }

    pub fn distinct_values(&self) -> usize {
        self.values.len()
    }
}

/// Aggregation state for one (prompt_version, provider).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub key: BucketKey,

    /// N for this scenario
    pub iterations_configured: u32,

    pub iterations_seen: u32,

    pub observed_iterations: BTreeSet<u32>,

    /// Endpoint label (or "none") -> tally
    pub endpoint_counts: BTreeMap<String, Tally>,

    /// Expected parameter name -> stats; seeded with every expected name
    pub parameter_stats: BTreeMap<String, ParameterStats>,

    pub latency_samples: Vec<u64>,
    pub tokens_in_samples: Vec<u64>,
    pub tokens_out_samples: Vec<u64>,

    /// Records carrying any error
    #[serde(default)]
    pub error_count: u32,

    /// Subset of `error_count` that were malformed replies
    #[serde(default)]
    pub malformed_count: u32,
}

impl AggregateBucket {
    pub fn new(key: BucketKey, iterations_configured: u32, expected_parameters: &[String]) -> Self {
        Self {
            key,
            iterations_configured,
            iterations_seen: 0,
            observed_iterations: BTreeSet::new(),
            endpoint_counts: BTreeMap::new(),
            parameter_stats: expected_parameters
                .iter()
                .map(|name| (name.clone(), ParameterStats::default()))
                .collect(),
            latency_samples: Vec::new(),
            tokens_in_samples: Vec::new(),
            tokens_out_samples: Vec::new(),
            error_count: 0,
            malformed_count: 0,
        }
    }

    /// Fold one record into the bucket.
    ///
    /// The bucket is left untouched when the record is rejected.
    pub fn apply(&mut self, record: &ResponseRecord) -> Result<(), ObserveError> {
        if record.iteration_index >= self.iterations_configured {
            return Err(ObserveError::IterationOutOfRange {
                key: record.key(),
                iterations: self.iterations_configured,
            });
        }

        if !self.observed_iterations.insert(record.iteration_index) {
            return Err(ObserveError::DuplicateObservation { key: record.key() });
        }

        let seq = u64::from(self.iterations_seen);
        self.iterations_seen += 1;

        bump(&mut self.endpoint_counts, record.endpoint_label(), seq);

        for (name, stats) in self.parameter_stats.iter_mut() {
            if let Some(value) = record.parameter(name) {
                stats.extracted_count += 1;
                bump(&mut stats.values, value, seq);
            }
        }

        if let Some(latency) = record.latency_ms {
            self.latency_samples.push(latency);
        }
        if let Some(tokens) = record.tokens_in {
            self.tokens_in_samples.push(tokens);
        }
        if let Some(tokens) = record.tokens_out {
            self.tokens_out_samples.push(tokens);
        }

        if let Some(error) = &record.error {
            self.error_count += 1;
            if error.kind == ErrorKind::MalformedReply {
                self.malformed_count += 1;
            }
        }

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.iterations_seen == 0
    }

    pub fn is_complete(&self) -> bool {
        self.iterations_seen == self.iterations_configured
    }

    /// Most common endpoint label, ties broken by first appearance.
    pub fn leading_endpoint(&self) -> Option<(&str, &Tally)> {
        leader(&self.endpoint_counts)
    }

    /// Check the structural invariants; used when restoring from a checkpoint.
    pub fn check_invariants(&self) -> Result<(), String> {
        let seen = u64::from(self.iterations_seen);

        if self.iterations_seen > self.iterations_configured {
            return Err(format!(
                "iterations_seen {} exceeds configured {}",
                self.iterations_seen, self.iterations_configured
            ));
        }

        if self.observed_iterations.len() as u64 != seen {
            return Err(format!(
                "{} observed iteration indices but iterations_seen is {}",
                self.observed_iterations.len(),
                seen
            ));
        }

        if let Some(last) = self.observed_iterations.iter().next_back() {
            if *last >= self.iterations_configured {
                return Err(format!("iteration index {} out of range", last));
            }
        }

        let endpoint_total: u64 = self.endpoint_counts.values().map(|t| t.count).sum();
        if endpoint_total != seen {
            return Err(format!(
                "endpoint counts sum to {} but iterations_seen is {}",
                endpoint_total, seen
            ));
        }

        for (name, stats) in &self.parameter_stats {
            let value_total: u64 = stats.values.values().map(|t| t.count).sum();
            if value_total != stats.extracted_count || stats.extracted_count > seen {
                return Err(format!(
                    "parameter '{}': values sum to {}, extracted_count {}, iterations_seen {}",
                    name, value_total, stats.extracted_count, seen
                ));
            }
        }

        let all_tallies = self
            .endpoint_counts
            .values()
            .chain(self.parameter_stats.values().flat_map(|s| s.values.values()));
        for tally in all_tallies {
            if tally.count == 0 || tally.first_seen >= seen {
                return Err(format!(
                    "tally with count {} first seen at {} is inconsistent",
                    tally.count, tally.first_seen
                ));
            }
        }

        for (what, len) in [
            ("latency", self.latency_samples.len()),
            ("tokens_in", self.tokens_in_samples.len()),
            ("tokens_out", self.tokens_out_samples.len()),
        ] {
            if len as u64 > seen {
                return Err(format!("{} samples ({}) exceed iterations_seen", what, len));
            }
        }

        if self.malformed_count > self.error_count || self.error_count > self.iterations_seen {
            return Err(format!(
                "error_count {} / malformed_count {} inconsistent",
                self.error_count, self.malformed_count
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKey;

    fn bucket(n: u32) -> AggregateBucket {
        AggregateBucket::new(BucketKey::new("V1", "Cohere"), n, &["person_name".to_string()])
    }

    fn record(i: u32, endpoint: Option<&str>, name: Option<&str>) -> ResponseRecord {
        ResponseRecord::new(RecordKey::new("V1", "Cohere", i))
            .with_endpoint(endpoint)
            .with_parameter("person_name", name)
    }

    #[test]
    fn test_apply_updates_tallies() {
        let mut b = bucket(3);
        b.apply(&record(0, Some("a"), Some("jane")).with_latency(100)).unwrap();
        b.apply(&record(1, None, None).with_tokens(10, 2)).unwrap();

        assert_eq!(b.iterations_seen, 2);
        assert_eq!(b.endpoint_counts["a"].count, 1);
        assert_eq!(b.endpoint_counts["none"].first_seen, 1);
        assert_eq!(b.parameter_stats["person_name"].extracted_count, 1);
        assert_eq!(b.latency_samples, vec![100]);
        assert_eq!(b.tokens_in_samples, vec![10]);
        assert!(b.check_invariants().is_ok());
    }

    #[test]
    fn test_duplicate_is_rejected_without_side_effects() {
        let mut b = bucket(3);
        b.apply(&record(1, Some("a"), Some("jane"))).unwrap();
        let before = b.clone();

        let err = b.apply(&record(1, Some("b"), Some("joe"))).unwrap_err();
        assert!(matches!(err, ObserveError::DuplicateObservation { .. }));
        assert_eq!(b, before);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let mut b = bucket(2);
        let err = b.apply(&record(2, Some("a"), None)).unwrap_err();
        assert!(matches!(err, ObserveError::IterationOutOfRange { iterations: 2, .. }));
        assert!(b.is_empty());
    }

    #[test]
    fn test_leader_prefers_first_seen_on_tie() {
        let mut b = bucket(4);
        b.apply(&record(3, Some("late"), Some("Jane"))).unwrap();
        b.apply(&record(0, Some("early"), Some("jane"))).unwrap();
        b.apply(&record(1, Some("early"), Some("jane"))).unwrap();
        b.apply(&record(2, Some("late"), Some("Jane"))).unwrap();

        // "late" and "Jane" arrived first (sequence 0) even though their iteration index is highest
        assert_eq!(b.leading_endpoint().map(|(l, _)| l), Some("late"));
        assert_eq!(
            b.parameter_stats["person_name"].most_common().map(|(v, _)| v),
            Some("Jane")
        );
    }

    #[test]
    fn test_error_counts() {
        let mut b = bucket(3);
        b.apply(&record(0, None, None).with_error(ErrorKind::ProviderCallFailed, "503"))
            .unwrap();
        b.apply(&record(1, None, None).with_error(ErrorKind::MalformedReply, "junk"))
            .unwrap();
        assert_eq!(b.error_count, 2);
        assert_eq!(b.malformed_count, 1);
    }

    #[test]
    fn test_invariant_violation_detected() {
        let mut b = bucket(3);
        b.apply(&record(0, Some("a"), Some("x"))).unwrap();
        b.endpoint_counts.get_mut("a").unwrap().count = 5;
        assert!(b.check_invariants().is_err());
    }
}
