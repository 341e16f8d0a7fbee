//! Status-only HTTP probe

use crate::transport_error;
use cibench_core::{Error, HttpProbe, Result};

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::trace;

/// reqwest-backed [`HttpProbe`]
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: Client,
}

impl ReqwestProbe {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn get_status(&self, url: &str, timeout: Duration) -> Result<u16> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error("Probe failed", e))?;
        let status = response.status().as_u16();
        trace!(url, status, "probe response");
        Ok(status)
    }
}
