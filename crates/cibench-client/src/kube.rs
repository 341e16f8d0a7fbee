//! Kubernetes NodePort discovery over the REST API
//!
//! Reads `GET /api/v1/namespaces/{ns}/services/{name}` for the node port and
//! `GET /api/v1/nodes` for a node address, then composes the base URL.

use crate::transport_error;
use cibench_core::{DiscoveryRequest, Error, Result, ServiceDiscovery};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Service-account mount inside a pod
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// API server connection settings
#[derive(Debug, Clone)]
pub struct KubeConfig {
    pub api_server: Url,
    pub token: Option<String>,
    /// PEM bundle used to verify the API server
    pub ca_cert: Option<PathBuf>,
    pub accept_invalid_certs: bool,
    pub request_timeout: Duration,
}

impl KubeConfig {
    pub fn new(api_server: &str) -> Result<Self> {
        let api_server = Url::parse(api_server)
            .map_err(|e| Error::config(format!("Invalid Kubernetes API server URL {api_server}: {e}")))?;
        Ok(Self {
            api_server,
            token: None,
            ca_cert: None,
            accept_invalid_certs: false,
            request_timeout: Duration::from_secs(10),
        })
    }

    /// Configuration from the pod's service account
    pub fn in_cluster() -> Result<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| Error::config("KUBERNETES_SERVICE_HOST is not set; not running in a cluster"))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        Self::from_service_account(&host, &port, Path::new(SERVICE_ACCOUNT_DIR))
    }

    pub fn from_service_account(host: &str, port: &str, dir: &Path) -> Result<Self> {
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        let token = std::fs::read_to_string(dir.join("token"))?;
        let ca = dir.join("ca.crt");

        let mut config = Self::new(&format!("https://{host}:{port}"))?;
        config.token = Some(token.trim().to_string());
        config.ca_cert = ca.exists().then_some(ca);
        Ok(config)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ServiceResource {
    #[serde(default)]
    spec: ServiceSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceSpec {
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicePort {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    node_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<NodeResource>,
}

#[derive(Debug, Deserialize)]
struct NodeResource {
    #[serde(default)]
    status: Option<NodeStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    addresses: Vec<NodeAddress>,
}

#[derive(Debug, Deserialize)]
struct NodeAddress {
    #[serde(rename = "type")]
    kind: String,
    address: String,
}

/// [`ServiceDiscovery`] against a Kubernetes API server
#[derive(Debug, Clone)]
pub struct KubeDiscovery {
    client: Client,
    config: KubeConfig,
}

impl KubeDiscovery {
    pub fn new(config: KubeConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs);

        if let Some(path) = &config.ca_cert {
            let pem = std::fs::read(path)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::config(format!("Invalid CA bundle {}: {}", path.display(), e)))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to create Kubernetes client: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self
            .config
            .api_server
            .join(path)
            .map_err(|e| Error::config(format!("Invalid API path {path}: {e}")))?;

        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("Kubernetes API request failed", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::discovery(format!("GET {url} returned {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| Error::discovery(format!("Invalid Kubernetes response from {url}: {e}")))
    }

    async fn resolve(&self, request: &DiscoveryRequest) -> Result<String> {
        let nodes: NodeList = self.get_json("/api/v1/nodes").await?;
        let node_ip = select_node_address(&nodes)?;

        let node_port = match request.node_port {
            Some(port) => port,
            None => {
                let path = format!(
                    "/api/v1/namespaces/{}/services/{}",
                    request.namespace, request.service_name
                );
                let service: ServiceResource = self.get_json(&path).await.map_err(|e| match e {
                    Error::Discovery(msg) => Error::discovery(format!(
                        "Service not found: {}/{}: {}",
                        request.namespace, request.service_name, msg
                    )),
                    other => other,
                })?;
                select_node_port(&service, request)?
            }
        };

        let base_url = format_base_url(&node_ip, node_port, &request.path_prefix);
        info!(
            namespace = %request.namespace,
            service = %request.service_name,
            base_url = %base_url,
            "Discovered service"
        );
        Ok(base_url)
    }
}

#[async_trait]
impl ServiceDiscovery for KubeDiscovery {
    /// Unreachable API servers surface as discovery errors
    async fn discover(&self, request: &DiscoveryRequest) -> Result<String> {
        self.resolve(request).await.map_err(|e| match e {
            Error::Transport(msg) => Error::discovery(msg),
            other => other,
        })
    }
}

fn select_node_port(service: &ServiceResource, request: &DiscoveryRequest) -> Result<u16> {
    service
        .spec
        .ports
        .iter()
        .find(|p| p.name.as_deref() == Some(request.port_name.as_str()))
        .and_then(|p| p.node_port)
        .ok_or_else(|| {
            Error::discovery(format!(
                "port name '{}' not found in service {}/{}",
                request.port_name, request.namespace, request.service_name
            ))
        })
}

/// First InternalIP across nodes, falling back to the first ExternalIP
fn select_node_address(nodes: &NodeList) -> Result<String> {
    let addresses: Vec<&NodeAddress> = nodes
        .items
        .iter()
        .filter_map(|n| n.status.as_ref())
        .flat_map(|s| s.addresses.iter())
        .filter(|a| !a.address.is_empty())
        .collect();

    for kind in ["InternalIP", "ExternalIP"] {
        if let Some(addr) = addresses.iter().find(|a| a.kind == kind) {
            debug!(kind, address = %addr.address, "Selected node address");
            return Ok(addr.address.clone());
        }
    }
    Err(Error::discovery("No node InternalIP found"))
}

fn format_base_url(node_ip: &str, node_port: u16, path_prefix: &str) -> String {
    let prefix = if path_prefix.starts_with('/') {
        path_prefix.to_string()
    } else {
        format!("/{path_prefix}")
    };
    format!("http://{node_ip}:{node_port}{prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(node_port: Option<u16>) -> DiscoveryRequest {
        DiscoveryRequest {
            namespace: "bench".to_string(),
            service_name: "infer-svc".to_string(),
            port_name: "http".to_string(),
            path_prefix: "/v1".to_string(),
            node_port,
        }
    }

    #[test]
    fn test_select_node_port() {
        let service: ServiceResource = serde_json::from_value(json!({
            "spec": {"ports": [
                {"name": "metrics", "port": 9090, "nodePort": 30090},
                {"name": "http", "port": 8000, "nodePort": 30080}
            ]}
        }))
        .unwrap();
        assert_eq!(select_node_port(&service, &request(None)).unwrap(), 30080);

        let mut other = request(None);
        other.port_name = "grpc".to_string();
        let err = select_node_port(&service, &other).unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
    }

    #[test]
    fn test_select_node_address_prefers_internal() {
        let nodes: NodeList = serde_json::from_value(json!({
            "items": [
                {"status": {"addresses": [{"type": "Hostname", "address": "node-a"}]}},
                {"status": {"addresses": [
                    {"type": "ExternalIP", "address": "203.0.113.5"},
                    {"type": "InternalIP", "address": "10.0.0.7"}
                ]}}
            ]
        }))
        .unwrap();
        assert_eq!(select_node_address(&nodes).unwrap(), "10.0.0.7");

        let empty: NodeList = serde_json::from_value(json!({"items": []})).unwrap();
        assert!(select_node_address(&empty).is_err());
    }

    #[test]
    fn test_format_base_url_normalises_prefix() {
        assert_eq!(format_base_url("10.0.0.7", 30080, "v1"), "http://10.0.0.7:30080/v1");
        assert_eq!(format_base_url("10.0.0.7", 30080, "/v1"), "http://10.0.0.7:30080/v1");
    }

    #[tokio::test]
    async fn test_unreachable_api_server_is_discovery_error() {
        let discovery = KubeDiscovery::new(KubeConfig::new("http://127.0.0.1:1").unwrap()).unwrap();

        let err = discovery.discover(&request(Some(30080))).await.unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
        assert_eq!(err.category(), "discovery");
    }

    #[test]
    fn test_from_service_account() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token"), "abc123\n").unwrap();

        let config = KubeConfig::from_service_account("10.96.0.1", "443", dir.path()).unwrap();
        assert_eq!(config.api_server.as_str(), "https://10.96.0.1/");
        assert_eq!(config.token.as_deref(), Some("abc123"));
        assert!(config.ca_cert.is_none());
    }
}
