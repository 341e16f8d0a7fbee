//! Gated metric publication

use cibench_core::{
    AllowAll, MetricsGateway, PublishEnvironment, PublishPolicy, PushRequest, RunType,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ships flat metric maps to a gateway when the run qualifies.
///
/// A push happens only for daily, non-dry runs with a resolvable gateway URL
/// whose environment the [`PublishPolicy`] accepts. Gateway failures are
/// logged and reported as `false`; they never propagate.
#[derive(Clone)]
pub struct MetricsPublisher {
    gateway: Arc<dyn MetricsGateway>,
    policy: Arc<dyn PublishPolicy>,
    environment: PublishEnvironment,
    default_gateway_url: Option<String>,
}

impl MetricsPublisher {
    pub fn new(gateway: Arc<dyn MetricsGateway>) -> Self {
        Self {
            gateway,
            policy: Arc::new(AllowAll),
            environment: PublishEnvironment::default(),
            default_gateway_url: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn PublishPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_environment(mut self, environment: PublishEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Gateway used when a publish call does not name one
    pub fn with_default_gateway_url(mut self, url: Option<String>) -> Self {
        self.default_gateway_url = url;
        self
    }

    fn resolve_url<'a>(&'a self, gateway_url: Option<&'a str>) -> Option<&'a str> {
        gateway_url
            .or(self.default_gateway_url.as_deref())
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Push `metrics` under `job` with `labels` as the grouping key.
    ///
    /// Returns `true` only when the gateway accepted the push.
    pub async fn publish(
        &self,
        job: &str,
        metrics: &BTreeMap<String, f64>,
        labels: &BTreeMap<String, String>,
        run_type: RunType,
        gateway_url: Option<&str>,
        dry_run: bool,
    ) -> bool {
        if run_type != RunType::Daily {
            debug!(run_type = %run_type, "Skipping publish for non-daily run");
            return false;
        }
        if dry_run {
            debug!("Skipping publish for dry run");
            return false;
        }
        let Some(url) = self.resolve_url(gateway_url) else {
            debug!("Skipping publish: no gateway URL configured");
            return false;
        };
        if !self.policy.allowed_to_publish(&self.environment) {
            info!(
                repository = ?self.environment.source_repository,
                "Publishing not allowed from this environment"
            );
            return false;
        }
        if metrics.is_empty() {
            debug!(job, "Skipping publish: no metrics");
            return false;
        }

        let request = PushRequest {
            gateway_url: url.to_string(),
            job: job.to_string(),
            metrics: metrics.clone(),
            labels: labels.clone(),
        };
        match self.gateway.push(&request).await {
            Ok(()) => {
                info!(job, gateway = %url, metrics = metrics.len(), "Published metrics");
                true
            }
            Err(e) => {
                warn!(job, gateway = %url, error = %e, "Failed to publish metrics");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cibench_core::CanonicalRepository;
    use cibench_dev::{setup_test_logging, MockGateway};

    const GATEWAY: &str = "http://pushgw:9091";

    fn sample_metrics() -> BTreeMap<String, f64> {
        BTreeMap::from([("ci_perf_throughput_rps_avg".to_string(), 15.0)])
    }

    fn sample_labels() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("model".to_string(), "qwen3-32b".to_string()),
            ("quant".to_string(), "w8a8".to_string()),
            ("scenario".to_string(), "local_single".to_string()),
        ])
    }

    #[tokio::test]
    async fn test_skips_without_gateway_call() {
        setup_test_logging();
        let gateway = MockGateway::new();
        let publisher = MetricsPublisher::new(Arc::new(gateway.clone()));
        let (metrics, labels) = (sample_metrics(), sample_labels());

        let pr = publisher
            .publish("vllm_cibench", &metrics, &labels, RunType::Pr, Some(GATEWAY), false)
            .await;
        let dry = publisher
            .publish("vllm_cibench", &metrics, &labels, RunType::Daily, Some(GATEWAY), true)
            .await;
        let no_url = publisher
            .publish("vllm_cibench", &metrics, &labels, RunType::Daily, None, false)
            .await;
        let blank_url = publisher
            .publish("vllm_cibench", &metrics, &labels, RunType::Daily, Some("  "), false)
            .await;

        assert!(!pr && !dry && !no_url && !blank_url);
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_daily_push_forwards_labels() {
        let gateway = MockGateway::new();
        let publisher = MetricsPublisher::new(Arc::new(gateway.clone()));

        let pushed = publisher
            .publish(
                "vllm_cibench",
                &sample_metrics(),
                &sample_labels(),
                RunType::Daily,
                Some(GATEWAY),
                false,
            )
            .await;
        assert!(pushed);

        let pushes = gateway.pushes().await;
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].gateway_url, GATEWAY);
        assert_eq!(pushes[0].job, "vllm_cibench");
        assert_eq!(pushes[0].labels, sample_labels());
        assert_eq!(pushes[0].metrics["ci_perf_throughput_rps_avg"], 15.0);
    }

    #[tokio::test]
    async fn test_default_gateway_url() {
        let gateway = MockGateway::new();
        let publisher = MetricsPublisher::new(Arc::new(gateway.clone()))
            .with_default_gateway_url(Some(GATEWAY.to_string()));

        assert!(
            publisher
                .publish("job", &sample_metrics(), &BTreeMap::new(), RunType::Daily, None, false)
                .await
        );
        assert_eq!(gateway.pushes().await[0].gateway_url, GATEWAY);
    }

    #[tokio::test]
    async fn test_policy_blocks_forks() {
        let gateway = MockGateway::new();
        let publisher = MetricsPublisher::new(Arc::new(gateway.clone()))
            .with_policy(Arc::new(CanonicalRepository::new("vllm-project/vllm-cibench")))
            .with_environment(PublishEnvironment {
                source_repository: Some("someone/fork".to_string()),
            });

        let pushed = publisher
            .publish("job", &sample_metrics(), &sample_labels(), RunType::Daily, Some(GATEWAY), false)
            .await;
        assert!(!pushed);
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_closure_policy() {
        let gateway = MockGateway::new();
        let deny = |_: &PublishEnvironment| false;
        let publisher = MetricsPublisher::new(Arc::new(gateway.clone())).with_policy(Arc::new(deny));

        assert!(
            !publisher
                .publish("job", &sample_metrics(), &sample_labels(), RunType::Daily, Some(GATEWAY), false)
                .await
        );
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_is_swallowed() {
        let gateway = MockGateway::failing();
        let publisher = MetricsPublisher::new(Arc::new(gateway.clone()));

        let pushed = publisher
            .publish("job", &sample_metrics(), &sample_labels(), RunType::Daily, Some(GATEWAY), false)
            .await;
        assert!(!pushed);
        assert_eq!(gateway.calls(), 1);
    }
}
