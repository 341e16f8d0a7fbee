//! Error handling for cibench
//!
//! Provides a unified error type and result type shared by every harness component.

/// Result type alias for cibench operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for cibench
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid scenario/plan/profile fields
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// Service lookup failure (missing service, port or node address)
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// The server answered with a non-2xx status
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Connection, DNS, TLS or body read failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A response envelope lacked a required field
    #[error("Missing field in response: {0}")]
    MissingField(String),

    /// A response could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Environment/config layering errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a discovery error
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    /// Create an invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidConfiguration(_) => "configuration",
            Error::Discovery(_) => "discovery",
            Error::HttpStatus { .. } => "http_status",
            Error::Transport(_) => "transport",
            Error::Timeout(_) => "timeout",
            Error::MissingField(_) => "missing_field",
            Error::InvalidResponse(_) => "invalid_response",
            Error::Internal(_) => "internal",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::config("missing service_name");
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert_eq!(err.to_string(), "Configuration error: missing service_name");
    }

    #[test]
    fn test_http_status_is_distinct_from_transport() {
        let status = Error::http_status(400, "bad request");
        let transport = Error::transport("connection refused");

        assert!(matches!(status, Error::HttpStatus { status: 400, .. }));
        assert_eq!(status.category(), "http_status");
        assert_eq!(transport.category(), "transport");
        assert_eq!(status.to_string(), "HTTP 400: bad request");
    }
}
