//! Orchestration error types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline state a scenario was in when it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Planning,
    Discovery,
    Probing,
    Functional,
    Perf,
    Accuracy,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::Discovery => "discovery",
            Stage::Probing => "probing",
            Stage::Functional => "functional",
            Stage::Perf => "perf",
            Stage::Accuracy => "accuracy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort a single scenario or a whole matrix run
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The `Failed(stage)` terminal of a scenario pipeline
    #[error("scenario {scenario} failed during {stage}: {source}")]
    ScenarioFailed {
        scenario: String,
        stage: Stage,
        #[source]
        source: cibench_core::Error,
    },

    /// A scenario task panicked or was cancelled
    #[error("scenario {scenario} task terminated abnormally: {reason}")]
    TaskPanicked { scenario: String, reason: String },
}

impl OrchestratorError {
    pub fn scenario_failed(scenario: &str, stage: Stage, source: cibench_core::Error) -> Self {
        Self::ScenarioFailed {
            scenario: scenario.to_string(),
            stage,
            source,
        }
    }

    /// Stage at which the scenario stopped, when known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            OrchestratorError::ScenarioFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            OrchestratorError::ScenarioFailed { source, .. } => source.category(),
            OrchestratorError::TaskPanicked { .. } => "task_panicked",
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_failed_display() {
        let err = OrchestratorError::scenario_failed(
            "k8s_hybrid",
            Stage::Discovery,
            cibench_core::Error::discovery("Service not found: bench/infer-svc"),
        );
        assert_eq!(err.stage(), Some(Stage::Discovery));
        assert_eq!(err.category(), "discovery");
        assert!(err.to_string().contains("failed during discovery"));
    }
}
