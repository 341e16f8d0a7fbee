//! # cibench-core
//!
//! Core types, traits, and utilities for cibench, a CI benchmark harness for
//! OpenAI-compatible inference servers.
//!
//! This crate provides the data structures and interfaces shared by every other
//! cibench component:
//!
//! - Scenario, matrix and test-profile configuration
//! - The process-boundary run environment
//! - Collaborator traits for HTTP, discovery and metrics gateways
//! - Typed response envelopes
//! - Error handling types

pub mod capabilities;
pub mod config;
pub mod env;
pub mod error;
pub mod response;
pub mod traits;

// Re-export commonly used types at the crate root
pub use capabilities::{capabilities_from_features, CapabilitySet};
pub use config::{
    AccuracyConfig, AccuracySample, CaseSpec, DatasetFormat, FunctionalConfig,
    FunctionalSelector, K8sParams, Matrix, MatrixEntry, MatrixSpec, PerfProfile, Plan, RunType,
    Scenario, ScenarioMode, ScenarioRegistry,
};
pub use env::{PerfMode, RunEnv};
pub use error::{Error, Result};
pub use response::{ChatCompletion, ChatMessage};
pub use traits::{
    AllowAll, CanonicalRepository, CompletionApi, CompletionOutput, DiscoveryRequest, HttpProbe,
    MetricsGateway, PublishEnvironment, PublishPolicy, PushRequest, ServiceDiscovery,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default metric job name
pub const DEFAULT_JOB: &str = "vllm_cibench";
