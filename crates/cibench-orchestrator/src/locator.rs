//! Base URL resolution per scenario mode

use cibench_core::{DiscoveryRequest, Error, Result, Scenario, ScenarioMode, ServiceDiscovery};
use std::sync::Arc;
use tracing::debug;

/// Turns a scenario into the base URL of its OpenAI-compatible API
#[derive(Clone)]
pub struct ServiceLocator {
    discovery: Arc<dyn ServiceDiscovery>,
}

impl ServiceLocator {
    pub fn new(discovery: Arc<dyn ServiceDiscovery>) -> Self {
        Self { discovery }
    }

    /// Local scenarios return their configured URL verbatim; cluster scenarios
    /// are resolved through the discovery collaborator.
    ///
    /// Missing fields are reported as configuration errors before any call.
    pub async fn resolve(&self, scenario: &Scenario) -> Result<String> {
        match scenario.mode {
            ScenarioMode::Local => scenario
                .base_url
                .as_deref()
                .filter(|url| !url.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::config(format!("scenario[{}] local mode requires base_url", scenario.id))
                }),
            ScenarioMode::K8sHybrid | ScenarioMode::K8sPd => {
                let request = discovery_request(scenario)?;
                debug!(
                    scenario = %scenario.id,
                    namespace = %request.namespace,
                    service = %request.service_name,
                    "Resolving cluster service"
                );
                self.discovery.discover(&request).await
            }
        }
    }
}

fn discovery_request(scenario: &Scenario) -> Result<DiscoveryRequest> {
    let k8s = scenario.k8s.as_ref().ok_or_else(|| {
        Error::config(format!(
            "scenario[{}] {} requires k8s section",
            scenario.id, scenario.mode
        ))
    })?;
    let service_name = k8s
        .service_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            Error::config(format!("scenario[{}] k8s.service_name is required", scenario.id))
        })?;

    Ok(DiscoveryRequest {
        namespace: k8s.namespace.clone(),
        service_name: service_name.to_string(),
        port_name: k8s.port_name.clone(),
        path_prefix: k8s.base_path.clone(),
        node_port: k8s.node_port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cibench_dev::{k8s_scenario, local_scenario, MockDiscovery};

    #[tokio::test]
    async fn test_local_returns_base_url_unchanged() {
        let discovery = MockDiscovery::returning("http://unused");
        let locator = ServiceLocator::new(Arc::new(discovery.clone()));
        let scenario = local_scenario("local_single", "http://127.0.0.1:9000/v1/");

        let url = locator.resolve(&scenario).await.unwrap();
        assert_eq!(url, "http://127.0.0.1:9000/v1/");
        assert_eq!(discovery.calls(), 0);
    }

    #[tokio::test]
    async fn test_local_without_url_is_config_error() {
        let discovery = MockDiscovery::returning("http://unused");
        let locator = ServiceLocator::new(Arc::new(discovery.clone()));
        let mut scenario = local_scenario("local_single", "http://127.0.0.1:9000/v1");
        scenario.base_url = None;

        let err = locator.resolve(&scenario).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert_eq!(discovery.calls(), 0);
    }

    #[tokio::test]
    async fn test_cluster_delegates_to_discovery() {
        let discovery = MockDiscovery::returning("http://10.0.0.7:30080/v1");
        let locator = ServiceLocator::new(Arc::new(discovery.clone()));
        let mut scenario = k8s_scenario("k8s_hybrid", "infer-svc");
        if let Some(k8s) = scenario.k8s.as_mut() {
            k8s.node_port = Some(30080);
        }

        let url = locator.resolve(&scenario).await.unwrap();
        assert_eq!(url, "http://10.0.0.7:30080/v1");

        let requests = discovery.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].namespace, "bench");
        assert_eq!(requests[0].service_name, "infer-svc");
        assert_eq!(requests[0].port_name, "http");
        assert_eq!(requests[0].path_prefix, "/v1");
        assert_eq!(requests[0].node_port, Some(30080));
    }

    #[tokio::test]
    async fn test_cluster_requires_service_name() {
        let discovery = MockDiscovery::returning("http://unused");
        let locator = ServiceLocator::new(Arc::new(discovery.clone()));
        let mut scenario = k8s_scenario("k8s_pd", "infer-svc");
        if let Some(k8s) = scenario.k8s.as_mut() {
            k8s.service_name = None;
        }

        let err = locator.resolve(&scenario).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert_eq!(discovery.calls(), 0);
    }

    #[tokio::test]
    async fn test_discovery_error_propagates() {
        let discovery = MockDiscovery::failing("Service not found: bench/infer-svc");
        let locator = ServiceLocator::new(Arc::new(discovery));
        let scenario = k8s_scenario("k8s_hybrid", "infer-svc");

        let err = locator.resolve(&scenario).await.unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
    }
}
