//! OpenAI-compatible client

use crate::{endpoint, transport_error};
use cibench_core::{CompletionApi, CompletionOutput, Error, Result};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            request_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// reqwest-backed [`CompletionApi`]
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key,
        })
    }

    async fn post(&self, url: &str, body: &Value) -> Result<CompletionOutput> {
        let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
        debug!(url, stream, "POST");

        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("Request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::http_status(status.as_u16(), text));
        }

        let text = response
            .text()
            .await
            .map_err(|e| transport_error("Failed to read response body", e))?;

        if stream {
            Ok(CompletionOutput::Stream(parse_sse_body(&text)?))
        } else {
            let value = serde_json::from_str(&text)
                .map_err(|e| Error::invalid_response(format!("Invalid JSON response: {}", e)))?;
            Ok(CompletionOutput::Json(value))
        }
    }
}

#[async_trait]
impl CompletionApi for OpenAiClient {
    async fn chat_completions(&self, base_url: &str, body: &Value) -> Result<CompletionOutput> {
        self.post(&endpoint(base_url, "chat/completions"), body).await
    }

    async fn completions(&self, base_url: &str, body: &Value) -> Result<CompletionOutput> {
        self.post(&endpoint(base_url, "completions"), body).await
    }
}

/// Parse a server-sent-event body into JSON chunks, stopping at `data: [DONE]`
pub fn parse_sse_body(text: &str) -> Result<Vec<Value>> {
    let mut chunks = Vec::new();
    for line in text.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            break;
        }
        if data.is_empty() {
            continue;
        }
        let chunk = serde_json::from_str(data)
            .map_err(|e| Error::invalid_response(format!("Invalid stream chunk {data:?}: {e}")))?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_sse_body() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
                    : keep-alive\n\
                    event: message\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\n\
                    data: [DONE]\n\n\
                    data: {\"ignored\":true}\n";
        let chunks = parse_sse_body(body).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], json!({"choices": [{"delta": {"content": "!"}}]}));
    }

    #[test]
    fn test_parse_sse_rejects_garbage() {
        let err = parse_sse_body("data: {not json}\n").unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[test]
    fn test_client_builds() {
        let client = OpenAiClient::new(ClientConfig::default().with_api_key("EMPTY"));
        assert!(client.is_ok());
    }
}
