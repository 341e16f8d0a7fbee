//! # cibench-orchestrator
//!
//! Scenario orchestration for cibench.
//!
//! This crate provides:
//! - [`ServiceLocator`]: base URL resolution for local and cluster scenarios
//! - [`ReadinessProbe`]: bounded exponential-backoff health polling
//! - [`ScenarioPipeline`]: the fixed discover, probe, functional, perf, accuracy
//!   and publish sequence for one scenario
//! - [`MatrixScheduler`]: every scenario of a matrix over a bounded worker pool
//!   with per-scenario failure isolation
//! - [`ServiceLauncher`]: autostart of local services with log capture
//! - [`ArtifactWriter`] and [`RepoLayout`] for on-disk inputs and outputs

pub mod artifacts;
pub mod error;
pub mod launcher;
pub mod layout;
pub mod locator;
pub mod matrix;
pub mod pipeline;
pub mod readiness;

pub use artifacts::ArtifactWriter;
pub use error::{OrchestratorError, Result, Stage};
pub use launcher::{start_command, RunningService, ServiceLauncher};
pub use layout::RepoLayout;
pub use locator::ServiceLocator;
pub use matrix::{MatrixOptions, MatrixRun, MatrixScheduler, MatrixSummary};
pub use pipeline::{
    Collaborators, OrchestrationResult, PerfMetrics, PhaseReport, PhaseStatus, RunOptions,
    ScenarioPipeline, ScenarioRunner,
};
pub use readiness::{BackoffPolicy, ProbeResult, ReadinessProbe};
