//! Flattening of phase outcomes into gauge maps

use cibench_core::Scenario;
use cibench_suites::{AccuracyResult, PerfRow, SuiteResult};
use std::collections::BTreeMap;

pub const PERF_THROUGHPUT_AVG: &str = "ci_perf_throughput_rps_avg";
pub const PERF_LATENCY_P50_AVG: &str = "ci_perf_latency_p50_ms_avg";
pub const ACCURACY_SCORE: &str = "ci_accuracy_score";
pub const FUNCTIONAL_CASE_OK: &str = "ci_functional_case_ok";

/// Grouping labels identifying a scenario
pub fn scenario_labels(scenario: &Scenario) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("model".to_string(), scenario.model.clone()),
        ("quant".to_string(), scenario.quant.clone()),
        ("scenario".to_string(), scenario.id.clone()),
    ])
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Means of throughput and p50 latency across rows; empty when there are no rows
pub fn perf_metrics(rows: &[PerfRow]) -> BTreeMap<String, f64> {
    let throughput: Vec<f64> = rows.iter().map(|r| r.throughput_rps).collect();
    let p50: Vec<f64> = rows.iter().map(|r| r.latency_p50_ms).collect();

    let mut out = BTreeMap::new();
    if let Some(avg) = mean(&throughput) {
        out.insert(PERF_THROUGHPUT_AVG.to_string(), avg);
    }
    if let Some(avg) = mean(&p50) {
        out.insert(PERF_LATENCY_P50_AVG.to_string(), avg);
    }
    out
}

/// Suite totals as `ci_functional_{total,passed,failed,skipped}`
pub fn functional_metrics(suite: &SuiteResult) -> BTreeMap<String, f64> {
    let s = &suite.summary;
    BTreeMap::from([
        ("ci_functional_total".to_string(), s.total as f64),
        ("ci_functional_passed".to_string(), s.passed as f64),
        ("ci_functional_failed".to_string(), s.failed as f64),
        ("ci_functional_skipped".to_string(), s.skipped as f64),
    ])
}

/// One `ci_functional_case_ok` gauge per executed case, keyed by case id.
///
/// Skipped cases are omitted.
pub fn functional_case_metrics(suite: &SuiteResult) -> Vec<(String, BTreeMap<String, f64>)> {
    suite
        .results
        .iter()
        .filter(|r| !r.skipped)
        .map(|r| {
            let value = if r.ok { 1.0 } else { 0.0 };
            (
                r.id.clone(),
                BTreeMap::from([(FUNCTIONAL_CASE_OK.to_string(), value)]),
            )
        })
        .collect()
}

pub fn accuracy_metrics(result: &AccuracyResult) -> BTreeMap<String, f64> {
    BTreeMap::from([(ACCURACY_SCORE.to_string(), result.score)])
}
