//! Prometheus push-gateway client
//!
//! Metrics are rendered with the text exposition format and sent with
//! `PUT {gateway}/metrics/job/{job}/{label}/{value}...`, which replaces every
//! metric in the grouping.

use crate::{MetricsError, Result};
use cibench_core::{MetricsGateway, PushRequest};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder};
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Build a registry holding one gauge per metric
pub fn build_registry(metrics: &BTreeMap<String, f64>) -> Result<Registry> {
    let registry = Registry::new();
    for (name, value) in metrics {
        let gauge = Gauge::with_opts(Opts::new(name.as_str(), name.as_str()))?;
        gauge.set(*value);
        registry.register(Box::new(gauge))?;
    }
    Ok(registry)
}

/// Render a registry in the Prometheus text format
pub fn encode_registry(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| MetricsError::Export(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| MetricsError::Export(format!("Failed to convert metrics to string: {}", e)))
}

/// Compose the grouping-key URL for a push.
///
/// Values containing `/` are sent base64url-encoded as `{label}@base64/{value}`;
/// empty values become `{label}@base64/=`.
pub fn grouping_url(gateway_url: &str, job: &str, labels: &BTreeMap<String, String>) -> Result<Url> {
    let mut url = Url::parse(gateway_url)
        .map_err(|e| MetricsError::InvalidUrl(format!("{gateway_url}: {e}")))?;

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| MetricsError::InvalidUrl(format!("{gateway_url}: cannot be a base")))?;
        segments.pop_if_empty().push("metrics");
        let pairs = labels.iter().map(|(k, v)| (k.as_str(), v.as_str()));
        for (name, value) in std::iter::once(("job", job)).chain(pairs) {
            if value.is_empty() {
                segments.push(&format!("{name}@base64")).push("=");
            } else if value.contains('/') {
                segments
                    .push(&format!("{name}@base64"))
                    .push(&URL_SAFE.encode(value));
            } else {
                segments.push(name).push(value);
            }
        }
    }
    Ok(url)
}

/// [`MetricsGateway`] speaking the push-gateway HTTP protocol
#[derive(Debug, Clone)]
pub struct PushgatewayClient {
    client: Client,
}

impl PushgatewayClient {
    pub fn new(timeout: Duration) -> cibench_core::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| cibench_core::Error::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetricsGateway for PushgatewayClient {
    async fn push(&self, request: &PushRequest) -> cibench_core::Result<()> {
        let registry = build_registry(&request.metrics)?;
        let body = encode_registry(&registry)?;
        let url = grouping_url(&request.gateway_url, &request.job, &request.labels)?;

        debug!(url = %url, metrics = request.metrics.len(), "Pushing metrics");
        let response = self
            .client
            .put(url.clone())
            .header(reqwest::header::CONTENT_TYPE, TextEncoder::new().format_type())
            .body(body)
            .send()
            .await
            .map_err(|e| cibench_core::Error::transport(format!("Push to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(cibench_core::Error::http_status(status.as_u16(), text));
        }
        info!(job = %request.job, url = %url, "Pushed metrics");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_registry() {
        let metrics = BTreeMap::from([
            ("ci_perf_throughput_rps_avg".to_string(), 15.0),
            ("ci_perf_latency_p50_ms_avg".to_string(), 55.0),
        ]);
        let registry = build_registry(&metrics).unwrap();
        let text = encode_registry(&registry).unwrap();

        assert!(text.contains("# TYPE ci_perf_throughput_rps_avg gauge"));
        assert!(text.contains("ci_perf_throughput_rps_avg 15"));
        assert!(text.contains("ci_perf_latency_p50_ms_avg 55"));
    }

    #[test]
    fn test_invalid_metric_name() {
        let metrics = BTreeMap::from([("bad name".to_string(), 1.0)]);
        assert!(matches!(build_registry(&metrics), Err(MetricsError::Registry(_))));
    }

    #[test]
    fn test_grouping_url() {
        let labels = BTreeMap::from([
            ("model".to_string(), "qwen3-32b".to_string()),
            ("scenario".to_string(), "local_single".to_string()),
        ]);
        let url = grouping_url("http://pushgw:9091", "vllm_cibench", &labels).unwrap();
        assert_eq!(
            url.as_str(),
            "http://pushgw:9091/metrics/job/vllm_cibench/model/qwen3-32b/scenario/local_single"
        );
    }

    #[test]
    fn test_grouping_url_base64_values() {
        let labels = BTreeMap::from([
            ("model".to_string(), "org/qwen3".to_string()),
            ("quant".to_string(), String::new()),
        ]);
        let url = grouping_url("http://pushgw:9091/", "vllm_cibench", &labels).unwrap();
        assert_eq!(
            url.as_str(),
            "http://pushgw:9091/metrics/job/vllm_cibench/model@base64/b3JnL3F3ZW4z/quant@base64/="
        );
    }

    #[test]
    fn test_grouping_url_rejects_garbage() {
        assert!(matches!(
            grouping_url("not a url", "job", &BTreeMap::new()),
            Err(MetricsError::InvalidUrl(_))
        ));
    }
}
