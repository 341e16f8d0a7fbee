//! Mock implementations of the cibench collaborator traits

use async_trait::async_trait;
use cibench_core::{
    CompletionApi, CompletionOutput, DiscoveryRequest, Error, HttpProbe, MetricsGateway,
    PushRequest, Result, ServiceDiscovery,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Scripted endpoint behaviour
#[derive(Debug, Clone)]
pub enum MockReply {
    Json(Value),
    Stream(Vec<Value>),
    HttpError(u16, String),
    Transport(String),
}

impl MockReply {
    fn into_result(self) -> Result<CompletionOutput> {
        match self {
            MockReply::Json(v) => Ok(CompletionOutput::Json(v)),
            MockReply::Stream(chunks) => Ok(CompletionOutput::Stream(chunks)),
            MockReply::HttpError(status, body) => Err(Error::http_status(status, body)),
            MockReply::Transport(msg) => Err(Error::transport(msg)),
        }
    }
}

/// Minimal valid `/chat/completions` body
pub fn chat_completion_json(content: &str) -> Value {
    json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "model": "mock",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 8, "completion_tokens": 1, "total_tokens": 9}
    })
}

type Responder = Arc<dyn Fn(&Value) -> MockReply + Send + Sync>;

/// Mock OpenAI-compatible API that records every request
#[derive(Clone)]
pub struct MockCompletionApi {
    inner: Arc<MockCompletionApiInner>,
}

struct MockCompletionApiInner {
    chat_script: Mutex<VecDeque<MockReply>>,
    chat_default: MockReply,
    chat_responder: Option<Responder>,
    completion_default: MockReply,
    latency: Option<Duration>,
    chat_requests: Mutex<Vec<Value>>,
    completion_requests: Mutex<Vec<Value>>,
    chat_calls: AtomicUsize,
    completion_calls: AtomicUsize,
}

impl Default for MockCompletionApi {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MockCompletionApi {
    /// Always answers `"hello"`
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MockCompletionApiBuilder {
        MockCompletionApiBuilder {
            chat_script: VecDeque::new(),
            chat_default: MockReply::Json(chat_completion_json("hello")),
            chat_responder: None,
            completion_default: MockReply::Json(json!({
                "id": "cmpl-mock",
                "object": "text_completion",
                "choices": [{"index": 0, "text": "hello", "finish_reason": "stop"}]
            })),
            latency: None,
        }
    }

    /// Number of chat requests received
    pub fn chat_calls(&self) -> usize {
        self.inner.chat_calls.load(Ordering::SeqCst)
    }

    /// Number of completion requests received
    pub fn completion_calls(&self) -> usize {
        self.inner.completion_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.chat_calls() + self.completion_calls()
    }

    pub async fn chat_requests(&self) -> Vec<Value> {
        self.inner.chat_requests.lock().await.clone()
    }

    pub async fn completion_requests(&self) -> Vec<Value> {
        self.inner.completion_requests.lock().await.clone()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.inner.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl CompletionApi for MockCompletionApi {
    async fn chat_completions(&self, base_url: &str, body: &Value) -> Result<CompletionOutput> {
        self.inner.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.chat_requests.lock().await.push(body.clone());
        debug!(base_url, "mock chat request");
        self.simulate_latency().await;

        let scripted = self.inner.chat_script.lock().await.pop_front();
        let reply = match (scripted, &self.inner.chat_responder) {
            (Some(reply), _) => reply,
            (None, Some(responder)) => responder(body),
            (None, None) => self.inner.chat_default.clone(),
        };
        reply.into_result()
    }

    async fn completions(&self, base_url: &str, body: &Value) -> Result<CompletionOutput> {
        self.inner.completion_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.completion_requests.lock().await.push(body.clone());
        debug!(base_url, "mock completion request");
        self.simulate_latency().await;
        self.inner.completion_default.clone().into_result()
    }
}

/// Builder for [`MockCompletionApi`]
pub struct MockCompletionApiBuilder {
    chat_script: VecDeque<MockReply>,
    chat_default: MockReply,
    chat_responder: Option<Responder>,
    completion_default: MockReply,
    latency: Option<Duration>,
}

impl MockCompletionApiBuilder {
    /// Reply used once, in order, before the default
    pub fn then_chat(mut self, reply: MockReply) -> Self {
        self.chat_script.push_back(reply);
        self
    }

    pub fn chat_default(mut self, reply: MockReply) -> Self {
        self.chat_default = reply;
        self
    }

    /// Compute chat replies from the request body
    pub fn chat_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&Value) -> MockReply + Send + Sync + 'static,
    {
        self.chat_responder = Some(Arc::new(responder));
        self
    }

    pub fn completion_default(mut self, reply: MockReply) -> Self {
        self.completion_default = reply;
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn build(self) -> MockCompletionApi {
        MockCompletionApi {
            inner: Arc::new(MockCompletionApiInner {
                chat_script: Mutex::new(self.chat_script),
                chat_default: self.chat_default,
                chat_responder: self.chat_responder,
                completion_default: self.completion_default,
                latency: self.latency,
                chat_requests: Mutex::new(Vec::new()),
                completion_requests: Mutex::new(Vec::new()),
                chat_calls: AtomicUsize::new(0),
                completion_calls: AtomicUsize::new(0),
            }),
        }
    }
}

/// Scripted probe outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReply {
    Status(u16),
    Unreachable,
}

/// Mock HTTP probe replaying a status sequence; the last entry repeats
#[derive(Debug, Clone)]
pub struct MockProbe {
    inner: Arc<MockProbeInner>,
}

#[derive(Debug)]
struct MockProbeInner {
    script: Mutex<VecDeque<ProbeReply>>,
    fallback: ProbeReply,
    calls: AtomicUsize,
    timeouts: Mutex<Vec<Duration>>,
}

impl MockProbe {
    pub fn new(script: Vec<ProbeReply>) -> Self {
        let fallback = script.last().copied().unwrap_or(ProbeReply::Unreachable);
        Self {
            inner: Arc::new(MockProbeInner {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicUsize::new(0),
                timeouts: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Fails `failures` times, then answers 200
    pub fn ready_after(failures: usize) -> Self {
        let mut script = vec![ProbeReply::Unreachable; failures];
        script.push(ProbeReply::Status(200));
        Self::new(script)
    }

    pub fn always(reply: ProbeReply) -> Self {
        Self::new(vec![reply])
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Per-attempt timeouts requested by the caller
    pub async fn timeouts(&self) -> Vec<Duration> {
        self.inner.timeouts.lock().await.clone()
    }
}

#[async_trait]
impl HttpProbe for MockProbe {
    async fn get_status(&self, url: &str, timeout: Duration) -> Result<u16> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.timeouts.lock().await.push(timeout);
        let reply = self
            .inner
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(self.inner.fallback);
        match reply {
            ProbeReply::Status(status) => Ok(status),
            ProbeReply::Unreachable => Err(Error::transport(format!("connection refused: {url}"))),
        }
    }
}

/// Mock discovery returning a fixed URL or failure
#[derive(Debug, Clone)]
pub struct MockDiscovery {
    inner: Arc<MockDiscoveryInner>,
}

#[derive(Debug)]
struct MockDiscoveryInner {
    outcome: std::result::Result<String, String>,
    requests: Mutex<Vec<DiscoveryRequest>>,
    calls: AtomicUsize,
}

impl MockDiscovery {
    pub fn returning(base_url: &str) -> Self {
        Self::with_outcome(Ok(base_url.to_string()))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_outcome(Err(message.to_string()))
    }

    fn with_outcome(outcome: std::result::Result<String, String>) -> Self {
        Self {
            inner: Arc::new(MockDiscoveryInner {
                outcome,
                requests: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub async fn requests(&self) -> Vec<DiscoveryRequest> {
        self.inner.requests.lock().await.clone()
    }
}

#[async_trait]
impl ServiceDiscovery for MockDiscovery {
    async fn discover(&self, request: &DiscoveryRequest) -> Result<String> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.requests.lock().await.push(request.clone());
        self.inner.outcome.clone().map_err(Error::discovery)
    }
}

/// Mock metrics gateway recording pushes
#[derive(Debug, Clone)]
pub struct MockGateway {
    inner: Arc<MockGatewayInner>,
}

#[derive(Debug)]
struct MockGatewayInner {
    fail: bool,
    pushes: Mutex<Vec<PushRequest>>,
    calls: AtomicUsize,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self::with_failure(false)
    }

    /// Gateway whose every push errors
    pub fn failing() -> Self {
        Self::with_failure(true)
    }

    fn with_failure(fail: bool) -> Self {
        Self {
            inner: Arc::new(MockGatewayInner {
                fail,
                pushes: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub async fn pushes(&self) -> Vec<PushRequest> {
        self.inner.pushes.lock().await.clone()
    }
}

#[async_trait]
impl MetricsGateway for MockGateway {
    async fn push(&self, request: &PushRequest) -> Result<()> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail {
            return Err(Error::transport("gateway unavailable"));
        }
        self.inner.pushes.lock().await.push(request.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_chat_replies() {
        let api = MockCompletionApi::builder()
            .then_chat(MockReply::HttpError(500, "boom".to_string()))
            .build();

        let first = api.chat_completions("http://mock/v1", &json!({})).await;
        assert!(matches!(first, Err(Error::HttpStatus { status: 500, .. })));

        let second = api.chat_completions("http://mock/v1", &json!({"n": 1})).await;
        assert!(second.is_ok());
        assert_eq!(api.chat_calls(), 2);
        assert_eq!(api.chat_requests().await[1], json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_probe_script_repeats_last() {
        let probe = MockProbe::ready_after(1);
        let timeout = Duration::from_secs(1);

        assert!(probe.get_status("http://x", timeout).await.is_err());
        assert_eq!(probe.get_status("http://x", timeout).await.unwrap(), 200);
        assert_eq!(probe.get_status("http://x", timeout).await.unwrap(), 200);
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_gateway_counts_calls() {
        let gateway = MockGateway::failing();
        let request = PushRequest {
            gateway_url: "http://gw".to_string(),
            job: "job".to_string(),
            metrics: Default::default(),
            labels: Default::default(),
        };
        assert!(gateway.push(&request).await.is_err());
        assert_eq!(gateway.calls(), 1);
        assert!(gateway.pushes().await.is_empty());
    }
}
