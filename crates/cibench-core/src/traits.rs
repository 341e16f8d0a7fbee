//! Collaborator traits for cibench components
//!
//! The pipeline only talks to the outside world through these interfaces so that
//! every stage can run against in-memory fakes.

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Body returned by an OpenAI-compatible endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutput {
    /// Non-streaming JSON object
    Json(Value),
    /// Server-sent-event chunks in arrival order, `[DONE]` excluded
    Stream(Vec<Value>),
}

impl CompletionOutput {
    pub fn is_stream(&self) -> bool {
        matches!(self, CompletionOutput::Stream(_))
    }

    /// Flatten into a single JSON value (streams become arrays)
    pub fn into_value(self) -> Value {
        match self {
            CompletionOutput::Json(v) => v,
            CompletionOutput::Stream(chunks) => Value::Array(chunks),
        }
    }
}

/// OpenAI-compatible HTTP surface
#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// `POST {base_url}/chat/completions`
    async fn chat_completions(&self, base_url: &str, body: &Value) -> Result<CompletionOutput>;

    /// `POST {base_url}/completions`
    async fn completions(&self, base_url: &str, body: &Value) -> Result<CompletionOutput>;
}

/// Plain HTTP GET returning only the status code
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn get_status(&self, url: &str, timeout: Duration) -> Result<u16>;
}

/// Arguments for cluster service discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub namespace: String,
    pub service_name: String,
    pub port_name: String,
    pub path_prefix: String,
    /// Explicit node port; bypasses the service port lookup
    pub node_port: Option<u16>,
}

/// Resolves a Kubernetes service to `http://<node_ip>:<node_port><path_prefix>`
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn discover(&self, request: &DiscoveryRequest) -> Result<String>;
}

/// One metrics push
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    pub gateway_url: String,
    pub job: String,
    pub metrics: BTreeMap<String, f64>,
    pub labels: BTreeMap<String, String>,
}

/// Metrics ingestion endpoint
#[async_trait]
pub trait MetricsGateway: Send + Sync {
    async fn push(&self, request: &PushRequest) -> Result<()>;
}

/// Facts about where a run originates, consulted by [`PublishPolicy`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishEnvironment {
    pub source_repository: Option<String>,
}

/// Decides whether metrics from this environment may be published
pub trait PublishPolicy: Send + Sync {
    fn allowed_to_publish(&self, environment: &PublishEnvironment) -> bool;
}

impl<F> PublishPolicy for F
where
    F: Fn(&PublishEnvironment) -> bool + Send + Sync,
{
    fn allowed_to_publish(&self, environment: &PublishEnvironment) -> bool {
        self(environment)
    }
}

/// Publishes from every environment
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PublishPolicy for AllowAll {
    fn allowed_to_publish(&self, _environment: &PublishEnvironment) -> bool {
        true
    }
}

/// Publishes only when the source repository is unknown or matches the canonical one
#[derive(Debug, Clone)]
pub struct CanonicalRepository {
    repository: String,
}

impl CanonicalRepository {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
        }
    }
}

impl PublishPolicy for CanonicalRepository {
    fn allowed_to_publish(&self, environment: &PublishEnvironment) -> bool {
        match environment.source_repository.as_deref() {
            None | Some("") => true,
            Some(repo) => repo == self.repository,
        }
    }
}
