//! Load engine and latency statistics
//!
//! Each measured batch dispatches `n_requests` chat calls over a pool of tokio
//! workers sized to the concurrency level. Successful latencies and the failure
//! count are collected behind one lock. Throughput is successful requests over
//! total wall-clock time, so failed requests still contribute their duration.

use cibench_core::{CompletionApi, Error, PerfProfile, Result};

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Required CSV columns, in order
pub const CSV_HEADER: &[&str] = &[
    "concurrency",
    "input_len",
    "output_len",
    "latency_p50_ms",
    "throughput_rps",
];

/// Optional CSV columns appended after the required ones
pub const CSV_OPTIONAL: &[&str] = &["latency_p95_ms", "latency_p99_ms"];

/// Warmup batches never exceed this concurrency
pub const WARMUP_MAX_CONCURRENCY: usize = 4;

/// Warmup batches send at most this many requests
pub const WARMUP_MAX_REQUESTS: usize = 2;

/// Linear-interpolated percentile over ascending samples
///
/// Uses rank `pct/100 * (n-1)` and interpolates between the bracketing samples.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Aggregate latency statistics for one concurrency level
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfSummary {
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub avg: f64,
    pub throughput_rps: f64,
}

/// Summarise successful latencies; all zeros when `total == 0` or `duration_s <= 0`
pub fn compute_summary(latencies_ms: &[f64], total: usize, duration_s: f64) -> PerfSummary {
    if total == 0 || duration_s <= 0.0 {
        return PerfSummary::default();
    }

    let mut sorted = latencies_ms.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let avg = if sorted.is_empty() {
        0.0
    } else {
        sorted.iter().sum::<f64>() / sorted.len() as f64
    };

    PerfSummary {
        p50: percentile(&sorted, 50.0),
        p75: percentile(&sorted, 75.0),
        p90: percentile(&sorted, 90.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        avg,
        throughput_rps: total as f64 / duration_s,
    }
}

/// One output row per concurrency level and input length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfRow {
    pub concurrency: usize,
    pub input_len: usize,
    pub output_len: usize,
    pub latency_p50_ms: f64,
    pub throughput_rps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_p75_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_p90_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_p95_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_p99_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_avg_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failures: Option<usize>,
}

impl PerfRow {
    /// Minimal row with only the required columns
    pub fn new(
        concurrency: usize,
        input_len: usize,
        output_len: usize,
        latency_p50_ms: f64,
        throughput_rps: f64,
    ) -> Self {
        Self {
            concurrency,
            input_len,
            output_len,
            latency_p50_ms,
            throughput_rps,
            latency_p75_ms: None,
            latency_p90_ms: None,
            latency_p95_ms: None,
            latency_p99_ms: None,
            latency_avg_ms: None,
            failures: None,
        }
    }

    fn from_summary(
        concurrency: usize,
        input_len: usize,
        output_len: usize,
        summary: &PerfSummary,
        failures: usize,
    ) -> Self {
        Self {
            latency_p75_ms: Some(summary.p75),
            latency_p90_ms: Some(summary.p90),
            latency_p95_ms: Some(summary.p95),
            latency_p99_ms: Some(summary.p99),
            latency_avg_ms: Some(summary.avg),
            failures: Some(failures),
            ..Self::new(concurrency, input_len, output_len, summary.p50, summary.throughput_rps)
        }
    }

    /// Present numeric columns keyed by CSV column name
    pub fn to_record(&self) -> Vec<(&'static str, f64)> {
        let mut record = vec![
            ("concurrency", self.concurrency as f64),
            ("input_len", self.input_len as f64),
            ("output_len", self.output_len as f64),
            ("latency_p50_ms", self.latency_p50_ms),
            ("throughput_rps", self.throughput_rps),
        ];
        let optional = [
            ("latency_p75_ms", self.latency_p75_ms),
            ("latency_p90_ms", self.latency_p90_ms),
            ("latency_p95_ms", self.latency_p95_ms),
            ("latency_p99_ms", self.latency_p99_ms),
            ("latency_avg_ms", self.latency_avg_ms),
            ("failures", self.failures.map(|f| f as f64)),
        ];
        record.extend(optional.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))));
        record
    }
}

/// Fixed two-row dataset for runs without a live server
pub fn mock_rows() -> Vec<PerfRow> {
    vec![
        PerfRow::new(1, 128, 128, 50.0, 10.0),
        PerfRow::new(2, 128, 128, 60.0, 20.0),
    ]
}

/// Render rows as CSV; optional columns appear when any row carries them
pub fn rows_to_csv(rows: &[PerfRow]) -> String {
    let with_p95 = rows.iter().any(|r| r.latency_p95_ms.is_some());
    let with_p99 = rows.iter().any(|r| r.latency_p99_ms.is_some());

    let mut header: Vec<&str> = CSV_HEADER.to_vec();
    if with_p95 {
        header.push("latency_p95_ms");
    }
    if with_p99 {
        header.push("latency_p99_ms");
    }

    let mut csv = header.join(",");
    csv.push('\n');
    for row in rows {
        let mut cells = vec![
            row.concurrency.to_string(),
            row.input_len.to_string(),
            row.output_len.to_string(),
            row.latency_p50_ms.to_string(),
            row.throughput_rps.to_string(),
        ];
        if with_p95 {
            cells.push(optional_cell(row.latency_p95_ms));
        }
        if with_p99 {
            cells.push(optional_cell(row.latency_p99_ms));
        }
        csv.push_str(&cells.join(","));
        csv.push('\n');
    }
    csv
}

fn optional_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Parse perf CSV; optional columns may be absent or empty
pub fn parse_csv(text: &str) -> Result<Vec<PerfRow>> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| Error::invalid_response("empty perf CSV"))?
        .split(',')
        .map(str::trim)
        .collect();

    let column = |name: &str| header.iter().position(|h| *h == name);
    let mut required = Vec::with_capacity(CSV_HEADER.len());
    for name in CSV_HEADER {
        required.push(
            column(name).ok_or_else(|| Error::invalid_response(format!("perf CSV missing column {name}")))?,
        );
    }
    let p95 = column("latency_p95_ms");
    let p99 = column("latency_p99_ms");

    let mut rows = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let cells: Vec<&str> = line.split(',').map(str::trim).collect();
        let cell = |idx: usize| -> Result<f64> {
            let raw = cells.get(idx).copied().unwrap_or("");
            raw.parse::<f64>().map_err(|_| {
                Error::invalid_response(format!("perf CSV row {}: invalid value {raw:?}", line_no + 1))
            })
        };
        let optional = |idx: Option<usize>| -> Result<Option<f64>> {
            match idx.and_then(|i| cells.get(i)).copied() {
                None | Some("") => Ok(None),
                Some(_) => idx.map(cell).transpose(),
            }
        };

        let mut row = PerfRow::new(
            cell(required[0])? as usize,
            cell(required[1])? as usize,
            cell(required[2])? as usize,
            cell(required[3])?,
            cell(required[4])?,
        );
        row.latency_p95_ms = optional(p95)?;
        row.latency_p99_ms = optional(p99)?;
        rows.push(row);
    }
    Ok(rows)
}

/// Prompt of approximately `length` characters
pub fn make_prompt(length: usize) -> String {
    const UNIT: &str = "vLLM is a fast and flexible LLM serving engine. ";
    UNIT.chars().cycle().take(length.max(1)).collect()
}

/// Raw measurements of one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub latencies_ms: Vec<f64>,
    pub failures: usize,
    pub duration: Duration,
}

/// Parameters of one batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSpec {
    pub prompt_len: usize,
    pub output_len: usize,
    pub n_requests: usize,
    pub concurrency: usize,
    pub temperature: f64,
}

#[derive(Default)]
struct BatchSamples {
    latencies_ms: Vec<f64>,
    failures: usize,
}

/// Drives concurrent chat batches and summarises them
#[derive(Clone)]
pub struct LoadEngine {
    api: Arc<dyn CompletionApi>,
}

impl LoadEngine {
    pub fn new(api: Arc<dyn CompletionApi>) -> Self {
        Self { api }
    }

    /// Run every concurrency level and input length of the profile
    pub async fn run_profile(
        &self,
        base_url: &str,
        model: &str,
        profile: &PerfProfile,
    ) -> Result<Vec<PerfRow>> {
        profile.validate()?;
        let output_len = profile.output_length[0];
        let mut rows = Vec::new();

        for &input_len in &profile.input_length {
            for &concurrency in &profile.concurrency {
                let warmup = BatchSpec {
                    prompt_len: input_len,
                    output_len,
                    n_requests: WARMUP_MAX_REQUESTS.min(profile.num_requests_per_concurrency),
                    concurrency: concurrency.clamp(1, WARMUP_MAX_CONCURRENCY),
                    temperature: profile.temperature,
                };
                for _ in 0..profile.warmup {
                    let outcome = self.run_batch(base_url, model, warmup).await;
                    debug!(concurrency, failures = outcome.failures, "Warmup batch done");
                }

                let measured = BatchSpec {
                    n_requests: profile.num_requests_per_concurrency,
                    concurrency,
                    ..warmup
                };
                let mut pooled = BatchOutcome::default();
                for epoch in 0..profile.epochs {
                    let outcome = self.run_batch(base_url, model, measured).await;
                    debug!(concurrency, epoch, failures = outcome.failures, "Epoch done");
                    pooled.latencies_ms.extend(outcome.latencies_ms);
                    pooled.failures += outcome.failures;
                    pooled.duration += outcome.duration;
                }

                if pooled.failures > 0 {
                    warn!(concurrency, failures = pooled.failures, "Requests failed during load");
                }
                let summary = compute_summary(
                    &pooled.latencies_ms,
                    pooled.latencies_ms.len(),
                    pooled.duration.as_secs_f64(),
                );
                info!(
                    concurrency,
                    input_len,
                    p50_ms = summary.p50,
                    throughput_rps = summary.throughput_rps,
                    "Concurrency level measured"
                );
                rows.push(PerfRow::from_summary(
                    concurrency,
                    input_len,
                    output_len,
                    &summary,
                    pooled.failures,
                ));
            }
        }
        Ok(rows)
    }

    /// One batch of `n_requests` over `concurrency` workers
    ///
    /// A panicking worker loses only its in-flight request, which is counted as
    /// a failure; the remaining workers keep draining the queue.
    pub async fn run_batch(&self, base_url: &str, model: &str, spec: BatchSpec) -> BatchOutcome {
        let n_requests = spec.n_requests.max(1);
        let workers = spec.concurrency.clamp(1, n_requests);
        let body = Arc::new(json!({
            "model": model,
            "messages": [{"role": "user", "content": make_prompt(spec.prompt_len)}],
            "temperature": spec.temperature,
            "max_tokens": spec.output_len,
        }));
        let base_url: Arc<str> = Arc::from(base_url);
        let next = Arc::new(AtomicUsize::new(0));
        let samples = Arc::new(Mutex::new(BatchSamples::default()));

        let started = Instant::now();
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let api = Arc::clone(&self.api);
            let body = Arc::clone(&body);
            let base_url = Arc::clone(&base_url);
            let next = Arc::clone(&next);
            let samples = Arc::clone(&samples);

            handles.push(tokio::spawn(async move {
                while next.fetch_add(1, Ordering::SeqCst) < n_requests {
                    let sent = Instant::now();
                    let result = api.chat_completions(&base_url, &body).await;
                    let latency_ms = sent.elapsed().as_secs_f64() * 1000.0;

                    let mut guard = samples.lock().await;
                    match result {
                        Ok(_) => guard.latencies_ms.push(latency_ms),
                        Err(_) => guard.failures += 1,
                    }
                }
            }));
        }

        let mut panicked = 0;
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Load worker terminated abnormally");
                panicked += 1;
            }
        }
        let duration = started.elapsed();

        let mut guard = samples.lock().await;
        BatchOutcome {
            latencies_ms: std::mem::take(&mut guard.latencies_ms),
            failures: guard.failures + panicked,
            duration,
        }
    }
}
