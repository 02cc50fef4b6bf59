//! Runs the scripted demo sweep shipped in `demos/` end to end.

use routebench_core::{ParameterStatus, RowStatus};
use routebench_runtime::{PromptStore, ProviderRegistry, SweepControllerBuilder, SweepFile};

const DEMO: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../demos/offline_sweep.yaml");

fn endpoint_total(report: &routebench_core::Report, provider: &str, endpoint: &str) -> u64 {
    report
        .rows()
        .filter(|row| row.provider == provider)
        .flat_map(|row| row.endpoints.iter())
        .filter(|share| share.endpoint.as_deref() == Some(endpoint))
        .map(|share| share.count)
        .sum()
}

#[tokio::test(start_paused = true)]
async fn test_offline_demo_sweep() {
    let sweep = SweepFile::from_file(DEMO).unwrap();
    let prompts = PromptStore::from_yaml_file(sweep.prompts.as_ref().unwrap()).unwrap();
    let registry = ProviderRegistry::with_defaults();

    let controller = SweepControllerBuilder::from_sweep_file(&sweep, &registry, prompts)
        .unwrap()
        .build()
        .unwrap();
    let outcome = controller.run().await;

    assert!(!outcome.cancelled);
    assert_eq!(outcome.rejected, 0);
    assert_eq!(controller.aggregator().observed_count(), 90);

    let report = &outcome.report;
    assert_eq!(report.versions.len(), 3);
    assert!(report.rows().all(|row| row.status == RowStatus::Complete));

    // claude always answers the same fenced JSON
    for version in ["v1", "v2", "v4"] {
        let row = report.row(version, "claude").unwrap();
        assert_eq!(row.endpoint_accuracy_pct, Some(100));
        assert_eq!(row.error_count, 0);
        match row.parameter("job_url").unwrap() {
            ParameterStatus::Extracted {
                consistency_pct,
                distinct_values,
                ..
            } => {
                assert_eq!(*consistency_pct, 100);
                assert_eq!(*distinct_values, 1);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    // cohere cycles through three replies over 30 calls
    assert_eq!(endpoint_total(report, "cohere", "analyze_job_fit"), 20);
    assert_eq!(endpoint_total(report, "cohere", "summarize_profile"), 10);

    // deepseek: one good reply, one malformed, one API error per cycle
    let errors: u32 = report
        .rows()
        .filter(|row| row.provider == "deepseek")
        .map(|row| row.error_count)
        .sum();
    let malformed: u32 = report
        .rows()
        .filter(|row| row.provider == "deepseek")
        .map(|row| row.malformed_count)
        .sum();
    assert_eq!(errors, 20);
    assert_eq!(malformed, 10);

    let deepseek = &outcome.usage["deepseek"];
    assert_eq!(deepseek.llm_calls, 20);
    assert_eq!(deepseek.failed_calls, 10);
    assert_eq!(outcome.usage["cohere"].failed_calls, 0);
}

#[test]
fn test_live_demo_parses() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../demos/live_sweep.yaml");
    let sweep = SweepFile::from_file(path).unwrap();
    assert_eq!(sweep.providers["claude"].provider_type, "anthropic");
    assert_eq!(sweep.runtime.max_total_tokens, Some(200_000));
    assert_eq!(sweep.runtime.retry.max_attempts, 3);
}
