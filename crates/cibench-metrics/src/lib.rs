//! # cibench-metrics
//!
//! Metric publication for cibench runs.
//!
//! This crate provides:
//! - Pure key renaming from CSV column names to Prometheus-style names
//! - Aggregation of perf, functional and accuracy outcomes into flat gauges
//! - [`MetricsPublisher`], which gates pushes by run type, dry-run, gateway URL
//!   and an injectable repository policy
//! - [`PushgatewayClient`], a Prometheus push-gateway implementation of
//!   [`cibench_core::MetricsGateway`]

pub mod aggregate;
pub mod publisher;
pub mod pushgateway;
pub mod rename;

pub use aggregate::{
    accuracy_metrics, functional_case_metrics, functional_metrics, perf_metrics, scenario_labels,
};
pub use publisher::MetricsPublisher;
pub use pushgateway::{build_registry, encode_registry, grouping_url, PushgatewayClient};
pub use rename::{rename_record_keys, DEFAULT_MAPPING};

// Error handling
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Registry error: {0}")]
    Registry(#[from] prometheus::Error),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, MetricsError>;

impl From<MetricsError> for cibench_core::Error {
    fn from(err: MetricsError) -> Self {
        match err {
            MetricsError::InvalidUrl(msg) => cibench_core::Error::config(msg),
            other => cibench_core::Error::internal(other.to_string()),
        }
    }
}
