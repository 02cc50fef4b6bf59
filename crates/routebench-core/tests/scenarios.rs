//! End-to-end aggregation scenarios: normalizer -> aggregator -> reducer.

use proptest::prelude::*;
use routebench_core::{
    aggregate, BucketKey, Capabilities, ConsistencyAggregator, ExtractionNormalizer,
    MetricsReducer, ParameterStatus, RawReply, RecordKey, ResponseRecord, RowStatus, Scenario,
};
use std::collections::{BTreeMap, VecDeque};

fn scenario(n: u32) -> Scenario {
    Scenario::from_yaml(&format!(
        r#"
name: job-fit
utterance: "Analyze job fit for Jane Doe at https://jobs.example.com/view?id=42&src=li%20feed"
expected_parameters: [job_url, person_name]
iterations_per_config: {n}
prompt_versions: [V1, V2]
providers: [Cohere, Claude, DeepSeek]
expected_endpoint: analyze_job_fit
"#
    ))
    .unwrap()
}

fn record(version: &str, provider: &str, i: u32) -> ResponseRecord {
    ResponseRecord::new(RecordKey::new(version, provider, i))
        .with_parameter("job_url", None::<String>)
        .with_parameter("person_name", None::<String>)
}

fn extracted(status: &ParameterStatus) -> (u32, u32, &str) {
    match status {
        ParameterStatus::Extracted {
            extracted_pct,
            consistency_pct,
            most_common_value,
            ..
        } => (*extracted_pct, *consistency_pct, most_common_value.as_str()),
        other => panic!("expected extracted, got {:?}", other),
    }
}

#[test]
fn all_iterations_agree() {
    let scenario = scenario(10);
    let records = (0..10).map(|i| {
        record("V1", "Cohere", i)
            .with_endpoint(Some("analyze_job_fit"))
            .with_parameter("job_url", Some("https://x"))
    });

    let (report, rejected) = aggregate(&scenario, records);
    assert!(rejected.is_empty());

    let row = report.row("V1", "Cohere").unwrap();
    assert_eq!(row.status, RowStatus::Complete);
    assert_eq!(extracted(row.parameter("job_url").unwrap()), (100, 100, "https://x"));
    assert_eq!(row.endpoint_accuracy_pct, Some(100));
}

#[test]
fn rare_extraction_is_still_consistent() {
    let scenario = scenario(10);
    let records = (0..10).map(|i| {
        let name = (i == 4).then_some("jane");
        record("V1", "Claude", i).with_parameter("person_name", name)
    });

    let (report, _) = aggregate(&scenario, records);
    let status = report.row("V1", "Claude").unwrap().parameter("person_name").unwrap();
    assert_eq!(extracted(status), (10, 100, "jane"));
    assert_eq!(status.to_string(), "'jane' (10% extracted, 100% consistent)");
}

#[test]
fn case_distinct_values_are_not_merged() {
    let scenario = scenario(10);
    let names = [Some("jane"), Some("Jane"), Some("jane"), None, Some("jane")];
    let records = names
        .iter()
        .enumerate()
        .map(|(i, name)| record("V2", "DeepSeek", i as u32).with_parameter("person_name", *name));

    let (report, _) = aggregate(&scenario, records);
    let status = report.row("V2", "DeepSeek").unwrap().parameter("person_name").unwrap();

    // 4 of 5 extracted; "jane" holds 3 of those 4
    assert_eq!(extracted(status), (80, 75, "jane"));
    match status {
        ParameterStatus::Extracted { distinct_values, .. } => assert_eq!(*distinct_values, 2),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn never_observed_bucket_is_not_found() {
    let scenario = scenario(10);
    let (report, _) = aggregate(&scenario, std::iter::empty());

    for row in report.rows() {
        assert_eq!(row.status, RowStatus::NoData);
        assert_eq!(row.endpoint_agreement_pct, None);
        for p in &row.parameters {
            assert_eq!(p.status, ParameterStatus::NotFound);
            assert_eq!(p.status.to_string(), "Not found");
            assert_eq!(p.status.extracted_pct(), None);
        }
    }
}

#[test]
fn observed_without_extraction_is_not_extracted() {
    let scenario = scenario(10);
    let records = (0..10).map(|i| record("V1", "DeepSeek", i).with_endpoint(Some("analyze_job_fit")));

    let (report, _) = aggregate(&scenario, records);
    let row = report.row("V1", "DeepSeek").unwrap();
    assert_eq!(row.iterations_seen, 10);
    assert_eq!(row.parameter("job_url"), Some(&ParameterStatus::NotExtracted));
    assert_eq!(row.parameter("job_url").unwrap().to_string(), "Not extracted (0%)");

    // a different bucket of the same report was never observed
    assert_eq!(
        report.row("V2", "DeepSeek").unwrap().parameter("job_url"),
        Some(&ParameterStatus::NotFound)
    );
}

#[test]
fn urls_are_kept_verbatim_through_the_normalizer() {
    let scenario = scenario(3);
    let normalizer = ExtractionNormalizer::for_scenario(&scenario);
    let url = "https://jobs.example.com/view?id=42&src=li%20feed";
    let replies = [
        format!(r#"{{"endpoint": "analyze_job_fit", "parameters": {{"job_url": "{url}", "person_name": "Jane Doe"}}}}"#),
        format!("```json\n{{\"endpoint\": \"analyze_job_fit\", \"job_url\": \"{url}\"}}\n```"),
        "NO_MATCH".to_string(),
    ];

    let agg = ConsistencyAggregator::new(scenario.clone());
    for (i, content) in replies.iter().enumerate() {
        let key = RecordKey::new("V1", "Cohere", i as u32);
        let reply = RawReply::new(content.clone()).with_latency(100 * (i as u64 + 1));
        agg.observe(normalizer.normalize(key, &reply, Capabilities::default()))
            .unwrap();
    }

    let report = MetricsReducer::new(&scenario).reduce_all(&agg);
    let row = report.row("V1", "Cohere").unwrap();
    assert_eq!(extracted(row.parameter("job_url").unwrap()), (67, 100, url));
    assert_eq!(extracted(row.parameter("person_name").unwrap()), (33, 100, "Jane Doe"));
    assert_eq!(row.endpoint_match_pct(Some("analyze_job_fit")), Some(67));
    assert_eq!(row.endpoint_match_pct(None), Some(33));
    assert_eq!(row.avg_latency_ms, Some(200));
}

#[test]
fn malformed_replies_count_as_observed() {
    let scenario = scenario(2);
    let normalizer = ExtractionNormalizer::for_scenario(&scenario);
    let agg = ConsistencyAggregator::new(scenario.clone());

    let garbage = RawReply::new("I'm not sure what you mean.").with_latency(50).with_tokens(10, 7);
    agg.observe(normalizer.normalize(RecordKey::new("V2", "Claude", 0), &garbage, Capabilities::default()))
        .unwrap();

    let row = MetricsReducer::new(&scenario)
        .reduce_all(&agg)
        .row("V2", "Claude")
        .cloned()
        .unwrap();
    assert_eq!(row.status, RowStatus::Partial);
    assert_eq!(row.malformed_count, 1);
    assert_eq!(row.error_count, 1);
    assert_eq!(row.avg_tokens_out, Some(7));
    assert_eq!(row.parameter("person_name"), Some(&ParameterStatus::NotExtracted));
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

const VERSIONS: [&str; 2] = ["V1", "V2"];
const PROVIDERS: [&str; 3] = ["Cohere", "Claude", "DeepSeek"];

fn record_strategy() -> impl Strategy<Value = ResponseRecord> {
    (
        0..VERSIONS.len(),
        0..PROVIDERS.len(),
        0..8u32,
        prop::option::of(prop::sample::select(vec!["analyze_job_fit", "send_email", "search"])),
        prop::option::of(prop::sample::select(vec!["jane", "Jane", "john"])),
        prop::option::of(0..5_000u64),
    )
        .prop_map(|(v, p, i, endpoint, name, latency)| {
            let mut r = record(VERSIONS[v], PROVIDERS[p], i)
                .with_endpoint(endpoint)
                .with_parameter("person_name", name);
            if let Some(latency) = latency {
                r = r.with_latency(latency);
            }
            r
        })
}

/// Merge per-bucket queues in the order picked by `choices`, keeping each
/// bucket's internal order.
fn interleave(records: &[ResponseRecord], choices: &[usize]) -> Vec<ResponseRecord> {
    let mut queues: BTreeMap<BucketKey, VecDeque<ResponseRecord>> = BTreeMap::new();
    for r in records {
        queues.entry(r.bucket_key()).or_default().push_back(r.clone());
    }

    let mut out = Vec::with_capacity(records.len());
    let mut choices = choices.iter().cycle();
    while out.len() < records.len() {
        let live: Vec<BucketKey> = queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        let pick = choices.next().copied().unwrap_or(0) % live.len();
        if let Some(r) = queues.get_mut(&live[pick]).and_then(VecDeque::pop_front) {
            out.push(r);
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn bucket_invariants_hold(records in prop::collection::vec(record_strategy(), 0..80)) {
        let scenario = scenario(6);
        let agg = ConsistencyAggregator::new(scenario);
        for r in records {
            let _ = agg.observe(r);
        }

        for bucket in agg.snapshot().values() {
            prop_assert!(bucket.iterations_seen <= 6);
            prop_assert!(bucket.check_invariants().is_ok());

            let endpoint_total: u64 = bucket.endpoint_counts.values().map(|t| t.count).sum();
            prop_assert_eq!(endpoint_total, u64::from(bucket.iterations_seen));

            for stats in bucket.parameter_stats.values() {
                let values: u64 = stats.values.values().map(|t| t.count).sum();
                let not_extracted = u64::from(bucket.iterations_seen) - stats.extracted_count;
                prop_assert_eq!(values + not_extracted, u64::from(bucket.iterations_seen));
            }
        }
    }

    #[test]
    fn replaying_records_is_idempotent(records in prop::collection::vec(record_strategy(), 0..60)) {
        let scenario = scenario(6);
        let agg = ConsistencyAggregator::new(scenario.clone());
        for r in &records {
            let _ = agg.observe(r.clone());
        }
        let once = MetricsReducer::new(&scenario).reduce_all(&agg);

        for r in &records {
            prop_assert!(agg.observe(r.clone()).is_err());
        }
        let twice = MetricsReducer::new(&scenario).reduce_all(&agg);

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn bucket_interleaving_does_not_change_report(
        records in prop::collection::vec(record_strategy(), 1..60),
        choices in prop::collection::vec(0usize..16, 1..40),
    ) {
        let scenario = scenario(6);
        let (in_order, _) = aggregate(&scenario, records.clone());
        let (shuffled, _) = aggregate(&scenario, interleave(&records, &choices));

        prop_assert_eq!(in_order, shuffled);
    }

    #[test]
    fn percentages_stay_in_range(records in prop::collection::vec(record_strategy(), 0..80)) {
        let scenario = scenario(6);
        let (report, _) = aggregate(&scenario, records);

        for row in report.rows() {
            let share_total: u64 = row.endpoints.iter().map(|e| e.count).sum();
            prop_assert_eq!(share_total, u64::from(row.iterations_seen));
            for share in &row.endpoints {
                prop_assert!(share.pct <= 100);
            }
            for p in &row.parameters {
                if let ParameterStatus::Extracted { extracted_pct, consistency_pct, .. } = &p.status {
                    prop_assert!(*extracted_pct > 0 && *extracted_pct <= 100);
                    prop_assert!(*consistency_pct > 0 && *consistency_pct <= 100);
                }
            }
        }
    }
}
