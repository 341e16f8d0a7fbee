//! # cibench-client
//!
//! Network implementations of the cibench collaborator traits:
//!
//! - [`OpenAiClient`]: `POST /chat/completions` and `/completions`, JSON or SSE
//! - [`ReqwestProbe`]: status-only GET used by readiness polling
//! - [`KubeDiscovery`]: NodePort discovery through the Kubernetes REST API

pub mod kube;
pub mod openai;
pub mod probe;

pub use kube::{KubeConfig, KubeDiscovery};
pub use openai::{parse_sse_body, ClientConfig, OpenAiClient};
pub use probe::ReqwestProbe;

use cibench_core::Error;

/// Map a reqwest failure onto the transport side of the error taxonomy
pub(crate) fn transport_error(context: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::timeout(format!("{context}: {err}"))
    } else {
        Error::transport(format!("{context}: {err}"))
    }
}

/// Join a base URL and a relative endpoint path
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
