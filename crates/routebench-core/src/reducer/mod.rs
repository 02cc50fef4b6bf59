//! Metrics reducer.
//!
//! Pure functions from aggregator state to the reportable table. The reducer
//! never fails and never divides by zero: empty buckets reduce to
//! [`RowStatus::NoData`] rows.
//!
//! All percentages and means are rounded half-up using integer arithmetic.

mod row;

pub use row::{
    EndpointShare, MetricsRow, ParameterMetrics, ParameterStatus, Report, RowStatus, VersionReport,
};

use crate::aggregator::{AggregateBucket, ConsistencyAggregator, ParameterStats};
use crate::record::{BucketKey, NO_ENDPOINT};
use crate::scenario::Scenario;

/// `round(part / whole * 100)`, half-up. Zero when `whole` is zero.
pub fn percent(part: u64, whole: u64) -> u32 {
    if whole == 0 {
        return 0;
    }
    let part = u128::from(part);
    let whole = u128::from(whole);
    ((part * 200 + whole) / (whole * 2)) as u32
}

/// Rounded (half-up) mean, `None` for an empty sample set.
pub fn rounded_mean(samples: &[u64]) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }
    let sum: u128 = samples.iter().map(|&s| u128::from(s)).sum();
    let n = samples.len() as u128;
    Some(((sum * 2 + n) / (n * 2)) as u64)
}

/// Reduces buckets to [`MetricsRow`]s for one scenario.
#[derive(Debug, Clone)]
pub struct MetricsReducer<'a> {
    scenario: &'a Scenario,
}

impl<'a> MetricsReducer<'a> {
    pub fn new(scenario: &'a Scenario) -> Self {
        Self { scenario }
    }

    /// Reduce one bucket.
    pub fn reduce(&self, bucket: &AggregateBucket) -> MetricsRow {
        let seen = u64::from(bucket.iterations_seen);

        let mut endpoints: Vec<(&String, _)> = bucket.endpoint_counts.iter().collect();
        endpoints.sort_by(|(_, a), (_, b)| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.first_seen.cmp(&b.first_seen))
        });
        let endpoints: Vec<EndpointShare> = endpoints
            .into_iter()
            .map(|(label, tally)| EndpointShare {
                endpoint: (label != NO_ENDPOINT).then(|| label.clone()),
                count: tally.count,
                pct: percent(tally.count, seen),
            })
            .collect();

        let endpoint_agreement_pct = if seen == 0 {
            None
        } else {
            endpoints.first().map(|share| share.pct)
        };

        let endpoint_accuracy_pct = match &self.scenario.expected_endpoint {
            Some(expected) if seen > 0 => Some(percent(
                bucket.endpoint_counts.get(expected).map_or(0, |t| t.count),
                seen,
            )),
            _ => None,
        };

        let parameters = self
            .scenario
            .expected_parameters
            .iter()
            .map(|name| ParameterMetrics {
                name: name.clone(),
                status: parameter_status(bucket.parameter_stats.get(name), seen),
            })
            .collect();

        let avg_completion_pct = completion_pct(bucket, &self.scenario.expected_parameters, seen);

        MetricsRow {
            prompt_version: bucket.key.prompt_version.clone(),
            provider: bucket.key.provider.clone(),
            status: RowStatus::from_counts(bucket.iterations_seen, bucket.iterations_configured),
            iterations_configured: bucket.iterations_configured,
            iterations_seen: bucket.iterations_seen,
            complete: bucket.is_complete(),
            error_count: bucket.error_count,
            malformed_count: bucket.malformed_count,
            endpoints,
            endpoint_agreement_pct,
            endpoint_accuracy_pct,
            parameters,
            avg_completion_pct,
            avg_latency_ms: rounded_mean(&bucket.latency_samples),
            avg_tokens_in: rounded_mean(&bucket.tokens_in_samples),
            avg_tokens_out: rounded_mean(&bucket.tokens_out_samples),
        }
    }

    /// Row for a bucket that was never observed.
    pub fn reduce_empty(&self, key: &BucketKey) -> MetricsRow {
        self.reduce(&AggregateBucket::new(
            key.clone(),
            self.scenario.iterations_per_config,
            &self.scenario.expected_parameters,
        ))
    }

    /// Reduce every bucket of the scenario, in scenario order.
    pub fn reduce_all(&self, aggregator: &ConsistencyAggregator) -> Report {
        let snapshot = aggregator.snapshot();

        let versions = self
            .scenario
            .prompt_versions
            .iter()
            .map(|version| VersionReport {
                prompt_version: version.clone(),
                rows: self
                    .scenario
                    .providers
                    .iter()
                    .map(|provider| {
                        let key = BucketKey::new(version.clone(), provider.clone());
                        match snapshot.get(&key) {
                            Some(bucket) => self.reduce(bucket),
                            None => self.reduce_empty(&key),
                        }
                    })
                    .collect(),
            })
            .collect();

        Report {
            scenario_name: self.scenario.name.clone(),
            utterance: self.scenario.utterance.clone(),
            iterations_per_config: self.scenario.iterations_per_config,
            expected_parameters: self.scenario.expected_parameters.clone(),
            expected_endpoint: self.scenario.expected_endpoint.clone(),
            versions,
        }
    }
}

/// Mean per-iteration share of expected parameters that were extracted.
///
/// Each iteration contributes `extracted / expected`, so the mean over all
/// seen iterations equals total extractions over `seen * expected`.
fn completion_pct(bucket: &AggregateBucket, expected: &[String], seen: u64) -> Option<u32> {
    if seen == 0 || expected.is_empty() {
        return None;
    }
    let extracted: u64 = expected
        .iter()
        .filter_map(|name| bucket.parameter_stats.get(name))
        .map(|stats| stats.extracted_count)
        .sum();
    Some(percent(extracted, seen * expected.len() as u64))
}

fn parameter_status(stats: Option<&ParameterStats>, seen: u64) -> ParameterStatus {
    if seen == 0 {
        return ParameterStatus::NotFound;
    }

    let stats = match stats {
        Some(stats) if stats.extracted_count > 0 => stats,
        _ => return ParameterStatus::NotExtracted,
    };

    match stats.most_common() {
        Some((value, tally)) => ParameterStatus::Extracted {
            extracted_pct: percent(stats.extracted_count, seen),
            consistency_pct: percent(tally.count, stats.extracted_count),
            most_common_value: value.to_string(),
            distinct_values: stats.distinct_values(),
            extracted_count: stats.extracted_count,
        },
        None => ParameterStatus::NotExtracted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ErrorKind, RecordKey, ResponseRecord};

    fn scenario() -> Scenario {
        Scenario::from_yaml(
            r#"
utterance: "Analyze job fit for John Smith"
expected_parameters: [job_url, person_name]
iterations_per_config: 4
prompt_versions: [V1, V2]
providers: [Cohere, Claude]
expected_endpoint: analyze_job_fit
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_percent_rounds_half_up() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(1, 8), 13); // 12.5
        assert_eq!(percent(1, 200), 1); // 0.5
        assert_eq!(percent(0, 10), 0);
        assert_eq!(percent(10, 10), 100);
        assert_eq!(percent(3, 0), 0);
    }

    #[test]
    fn test_rounded_mean() {
        assert_eq!(rounded_mean(&[]), None);
        assert_eq!(rounded_mean(&[1, 2]), Some(2)); // 1.5
        assert_eq!(rounded_mean(&[100, 200, 301]), Some(200));
        assert_eq!(rounded_mean(&[u64::MAX, u64::MAX]), Some(u64::MAX));
    }

    #[test]
    fn test_reduce_mixed_bucket() {
        let scenario = scenario();
        let agg = ConsistencyAggregator::new(scenario.clone());
        let records = [
            ResponseRecord::new(RecordKey::new("V1", "Cohere", 0))
                .with_endpoint(Some("analyze_job_fit"))
                .with_parameter("job_url", Some("https://x"))
                .with_latency(100)
                .with_tokens(200, 20),
            ResponseRecord::new(RecordKey::new("V1", "Cohere", 1))
                .with_endpoint(Some("analyze_job_fit"))
                .with_parameter("job_url", Some("https://y"))
                .with_latency(201)
                .with_tokens(200, 21),
            ResponseRecord::new(RecordKey::new("V1", "Cohere", 2))
                .with_endpoint(None::<String>)
                .with_parameter("job_url", Some("https://x"))
                .with_latency(300),
        ];
        for record in records {
            agg.observe(record).unwrap();
        }

        let report = MetricsReducer::new(&scenario).reduce_all(&agg);
        let row = report.row("V1", "Cohere").unwrap();

        assert_eq!(row.status, RowStatus::Partial);
        assert!(!row.complete);
        assert_eq!(row.iterations_seen, 3);
        assert_eq!(row.endpoint_match_pct(Some("analyze_job_fit")), Some(67));
        assert_eq!(row.endpoint_match_pct(None), Some(33));
        assert_eq!(row.endpoint_match_pct(Some("other")), Some(0));
        assert_eq!(row.endpoint_agreement_pct, Some(67));
        assert_eq!(row.endpoint_accuracy_pct, Some(67));
        assert_eq!(row.avg_latency_ms, Some(200));
        assert_eq!(row.avg_tokens_in, Some(200));
        assert_eq!(row.avg_tokens_out, Some(21)); // 20.5
        // job_url in every iteration, person_name in none
        assert_eq!(row.avg_completion_pct, Some(50));

        match row.parameter("job_url").unwrap() {
            ParameterStatus::Extracted {
                extracted_pct,
                consistency_pct,
                most_common_value,
                distinct_values,
                ..
            } => {
                assert_eq!(*extracted_pct, 100);
                assert_eq!(*consistency_pct, 67);
                assert_eq!(most_common_value, "https://x");
                assert_eq!(*distinct_values, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(row.parameter("person_name"), Some(&ParameterStatus::NotExtracted));
    }

    #[test]
    fn test_reduce_all_fills_missing_rows_in_order() {
        let scenario = scenario();
        let agg = ConsistencyAggregator::new(scenario.clone());
        agg.observe(
            ResponseRecord::new(RecordKey::new("V2", "Claude", 0))
                .with_error(ErrorKind::ProviderCallFailed, "timeout"),
        )
        .unwrap();

        let report = MetricsReducer::new(&scenario).reduce_all(&agg);
        let order: Vec<(String, String)> = report
            .rows()
            .map(|r| (r.prompt_version.clone(), r.provider.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("V1".to_string(), "Cohere".to_string()),
                ("V1".to_string(), "Claude".to_string()),
                ("V2".to_string(), "Cohere".to_string()),
                ("V2".to_string(), "Claude".to_string()),
            ]
        );

        let empty = report.row("V1", "Cohere").unwrap();
        assert_eq!(empty.status, RowStatus::NoData);
        assert_eq!(empty.endpoint_agreement_pct, None);
        assert_eq!(empty.endpoint_accuracy_pct, None);
        assert_eq!(empty.endpoint_match_pct(None), None);
        assert_eq!(empty.avg_latency_ms, None);
        assert_eq!(empty.avg_completion_pct, None);
        assert_eq!(empty.parameter("job_url"), Some(&ParameterStatus::NotFound));

        let failed = report.row("V2", "Claude").unwrap();
        assert_eq!(failed.error_count, 1);
        assert_eq!(failed.endpoint_match_pct(None), Some(100));
        assert_eq!(failed.endpoint_accuracy_pct, Some(0));
        assert_eq!(failed.avg_completion_pct, Some(0));
        assert_eq!(failed.parameter("job_url"), Some(&ParameterStatus::NotExtracted));
    }

    #[test]
    fn test_endpoint_distribution_order() {
        let scenario = scenario();
        let mut bucket = AggregateBucket::new(
            BucketKey::new("V1", "Cohere"),
            4,
            &scenario.expected_parameters,
        );
        for (i, endpoint) in ["b", "a", "a", "b"].iter().enumerate() {
            bucket
                .apply(&ResponseRecord::new(RecordKey::new("V1", "Cohere", i as u32)).with_endpoint(Some(*endpoint)))
                .unwrap();
        }

        let row = MetricsReducer::new(&scenario).reduce(&bucket);
        let labels: Vec<_> = row.endpoints.iter().map(|e| e.endpoint.as_deref()).collect();
        assert_eq!(labels, vec![Some("b"), Some("a")]);
        assert_eq!(row.status, RowStatus::Complete);
    }
}
