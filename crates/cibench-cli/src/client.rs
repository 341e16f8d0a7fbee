//! Concrete collaborators for CLI runs

use anyhow::{Context, Result};
use async_trait::async_trait;
use cibench_client::{ClientConfig, KubeConfig, KubeDiscovery, OpenAiClient, ReqwestProbe};
use cibench_core::{CanonicalRepository, DiscoveryRequest, RunEnv, ServiceDiscovery};
use cibench_metrics::{MetricsPublisher, PushgatewayClient};
use cibench_orchestrator::Collaborators;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

/// Connection settings taken from global flags
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub push_timeout: Duration,
    pub kube_api_server: Option<String>,
    pub kube_token: Option<String>,
    pub kube_insecure: bool,
    /// Only runs from this repository publish metrics
    pub canonical_repository: Option<String>,
}

/// Builds the Kubernetes client on first use, so local-only runs never need
/// cluster credentials
pub struct LazyKubeDiscovery {
    options: ClientOptions,
    inner: OnceCell<KubeDiscovery>,
}

impl LazyKubeDiscovery {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            inner: OnceCell::new(),
        }
    }

    fn build(&self) -> cibench_core::Result<KubeDiscovery> {
        let mut config = match &self.options.kube_api_server {
            Some(server) => KubeConfig::new(server)?,
            None => KubeConfig::in_cluster()?,
        };
        if let Some(token) = &self.options.kube_token {
            config = config.with_token(token.clone());
        }
        config = config.with_accept_invalid_certs(self.options.kube_insecure);
        debug!(api_server = %config.api_server, "Connecting to Kubernetes API");
        KubeDiscovery::new(config)
    }
}

#[async_trait]
impl ServiceDiscovery for LazyKubeDiscovery {
    async fn discover(&self, request: &DiscoveryRequest) -> cibench_core::Result<String> {
        let discovery = self.inner.get_or_try_init(|| async { self.build() }).await?;
        discovery.discover(request).await
    }
}

/// HTTP, probe, discovery and publisher implementations for one process
pub fn build_collaborators(options: &ClientOptions, env: &RunEnv) -> Result<Collaborators> {
    let mut client_config = ClientConfig::default().with_request_timeout(options.request_timeout);
    if let Some(key) = &options.api_key {
        client_config = client_config.with_api_key(key.clone());
    }
    let api = OpenAiClient::new(client_config).context("Failed to create OpenAI client")?;
    let probe = ReqwestProbe::new().context("Failed to create readiness probe")?;
    let gateway =
        PushgatewayClient::new(options.push_timeout).context("Failed to create push gateway client")?;

    let mut publisher = MetricsPublisher::new(Arc::new(gateway))
        .with_environment(env.publish_environment())
        .with_default_gateway_url(env.pushgateway_url.clone());
    if let Some(repository) = &options.canonical_repository {
        publisher = publisher.with_policy(Arc::new(CanonicalRepository::new(repository.clone())));
    }

    Ok(Collaborators {
        api: Arc::new(api),
        probe: Arc::new(probe),
        discovery: Arc::new(LazyKubeDiscovery::new(options.clone())),
        publisher,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DiscoveryRequest {
        DiscoveryRequest {
            namespace: "bench".to_string(),
            service_name: "infer-svc".to_string(),
            port_name: "http".to_string(),
            path_prefix: "/v1".to_string(),
            node_port: None,
        }
    }

    #[tokio::test]
    async fn test_invalid_api_server_fails_at_discovery() {
        let discovery = LazyKubeDiscovery::new(ClientOptions {
            kube_api_server: Some("not a url".to_string()),
            ..ClientOptions::default()
        });

        let err = discovery.discover(&request()).await.unwrap_err();
        assert_eq!(err.category(), "configuration");
        assert!(discovery.inner.get().is_none());
    }

    #[test]
    fn test_build_collaborators() {
        let options = ClientOptions {
            request_timeout: Duration::from_secs(30),
            push_timeout: Duration::from_secs(5),
            canonical_repository: Some("vllm-project/vllm-cibench".to_string()),
            ..ClientOptions::default()
        };
        assert!(build_collaborators(&options, &RunEnv::default()).is_ok());
    }
}
