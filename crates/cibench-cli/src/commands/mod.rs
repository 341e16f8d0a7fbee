//! Command implementations for the cibench CLI

pub mod matrix;
pub mod plan;
pub mod run;
pub mod scenarios;

use crate::client::{build_collaborators, ClientOptions};
use crate::output::{format_seconds, yes_no, Formattable, OutputFormat};
use anyhow::{Context, Result};
use cibench_core::{FunctionalSelector, Matrix, RunEnv};
use cibench_orchestrator::{
    BackoffPolicy, OrchestrationResult, PhaseStatus, RepoLayout, ScenarioPipeline,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

/// State shared by every subcommand
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub layout: RepoLayout,
    pub output: OutputFormat,
    pub clients: ClientOptions,
    /// Push-gateway job name
    pub job: String,
    pub backoff: BackoffPolicy,
}

impl CommandContext {
    /// Matrix file, or an empty matrix whose plans are all the defaults
    pub fn matrix_or_default(&self) -> Result<Matrix> {
        let path = self.layout.matrix_path();
        if path.exists() {
            self.layout
                .load_matrix()
                .with_context(|| format!("Failed to load {}", path.display()))
        } else {
            debug!(path = %path.display(), "No matrix file, using default plans");
            Ok(Matrix::default())
        }
    }

    pub fn pipeline(&self, artifacts_dir: Option<PathBuf>) -> Result<ScenarioPipeline> {
        let env = RunEnv::from_env().context("Invalid CIBENCH_* environment")?;
        let scenarios = self.layout.load_scenarios().with_context(|| {
            format!("Failed to load scenarios from {}", self.layout.scenarios_dir().display())
        })?;
        let collaborators = build_collaborators(&self.clients, &env)?;
        debug!(scenarios = scenarios.len(), perf_mode = env.perf_mode.as_str(), "Pipeline ready");

        Ok(ScenarioPipeline::new(collaborators, scenarios, self.layout.clone(), env)
            .with_backoff(self.backoff)
            .with_job(self.job.clone())
            .with_artifacts_dir(artifacts_dir))
    }
}

pub fn describe_selector(selector: &FunctionalSelector) -> String {
    match selector {
        FunctionalSelector::All => "all".to_string(),
        FunctionalSelector::Cases(ids) => ids.join(","),
        FunctionalSelector::Disabled => "disabled".to_string(),
    }
}

fn phase(status: PhaseStatus) -> String {
    match status {
        PhaseStatus::Ok => "ok",
        PhaseStatus::Failed => "failed",
        PhaseStatus::Skipped => "skipped",
    }
    .to_string()
}

/// Table view of one scenario outcome
#[derive(Debug, Serialize)]
pub struct ResultRow {
    pub scenario: String,
    pub ready: String,
    pub functional: String,
    pub cases: String,
    pub perf: String,
    pub throughput: String,
    pub accuracy: String,
    pub score: String,
    pub pushed: String,
    pub elapsed: String,
    pub error: String,
}

impl From<&OrchestrationResult> for ResultRow {
    fn from(result: &OrchestrationResult) -> Self {
        let cases = result
            .functional_report
            .as_ref()
            .map(|s| format!("{}/{}", s.summary.passed, s.summary.total))
            .unwrap_or_else(|| "-".to_string());
        let throughput = result
            .perf_metrics
            .aggregates
            .get(cibench_metrics::aggregate::PERF_THROUGHPUT_AVG)
            .map(|v| format!("{:.2} rps", v))
            .unwrap_or_else(|| "-".to_string());
        let score = result
            .accuracy
            .as_ref()
            .map(|a| format!("{:.3}", a.score))
            .unwrap_or_else(|| "-".to_string());
        let ready = match &result.readiness {
            Some(r) => yes_no(r.ready),
            None => "-".to_string(),
        };
        let error = match (&result.error, result.phase_errors.is_empty()) {
            (Some(e), _) => e.clone(),
            (None, false) => result
                .phase_errors
                .iter()
                .map(|(stage, e)| format!("{}: {}", stage, e))
                .collect::<Vec<_>>()
                .join("; "),
            (None, true) => String::new(),
        };

        Self {
            scenario: result.scenario.clone(),
            ready,
            functional: phase(result.status.functional),
            cases,
            perf: phase(result.status.perf),
            throughput,
            accuracy: phase(result.status.accuracy),
            score,
            pushed: yes_no(result.pushed),
            elapsed: format_seconds(result.elapsed_s),
            error,
        }
    }
}

impl Formattable for ResultRow {
    fn table_headers() -> Vec<String> {
        [
            "Scenario", "Ready", "Functional", "Cases", "Perf", "Throughput", "Accuracy", "Score",
            "Pushed", "Elapsed", "Error",
        ]
        .iter()
        .map(|h| h.to_string())
        .collect()
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            self.scenario.clone(),
            self.ready.clone(),
            self.functional.clone(),
            self.cases.clone(),
            self.perf.clone(),
            self.throughput.clone(),
            self.accuracy.clone(),
            self.score.clone(),
            self.pushed.clone(),
            self.elapsed.clone(),
            self.error.clone(),
        ]
    }
}
