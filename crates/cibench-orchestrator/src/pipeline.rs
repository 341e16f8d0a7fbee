//! Per-scenario pipeline
//!
//! `Discovering -> Probing -> Functional -> Perf -> Accuracy -> Done`. Only the
//! first two stages can end a scenario early (`Failed(stage)`); phase failures
//! are recorded in the result and the pipeline carries on.

use crate::artifacts::ArtifactWriter;
use crate::error::{OrchestratorError, Result, Stage};
use crate::launcher::ServiceLauncher;
use crate::layout::RepoLayout;
use crate::locator::ServiceLocator;
use crate::readiness::{BackoffPolicy, ProbeResult, ReadinessProbe};

use async_trait::async_trait;
use cibench_core::{
    capabilities_from_features, AccuracyConfig, AccuracySample, CapabilitySet, CompletionApi,
    Error, FunctionalConfig, HttpProbe, PerfMode, PerfProfile, Plan, RunEnv, RunType, Scenario,
    ScenarioMode, ScenarioRegistry, ServiceDiscovery, DEFAULT_JOB,
};
use cibench_metrics::{
    accuracy_metrics, functional_case_metrics, functional_metrics, perf_metrics,
    rename_record_keys, scenario_labels, MetricsPublisher, DEFAULT_MAPPING,
};
use cibench_suites::{
    build_cases, load_samples, mock_rows, select_cases, AccuracyEvaluator, AccuracyResult,
    FunctionalRunner, LoadEngine, PerfRow, SuiteResult, TestCase,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-run switches
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub run_type: RunType,
    /// Readiness deadline; defaults to the scenario's `startup_timeout_seconds`
    pub timeout: Option<Duration>,
    pub dry_run: bool,
}

impl RunOptions {
    pub fn new(run_type: RunType) -> Self {
        Self {
            run_type,
            timeout: None,
            dry_run: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn publishes(&self) -> bool {
        self.run_type == RunType::Daily && !self.dry_run
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Ok,
    Failed,
    #[default]
    Skipped,
}

impl PhaseStatus {
    fn from_ok(ok: bool) -> Self {
        if ok {
            PhaseStatus::Ok
        } else {
            PhaseStatus::Failed
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub functional: PhaseStatus,
    pub perf: PhaseStatus,
    pub accuracy: PhaseStatus,
}

impl PhaseReport {
    pub fn any_failed(&self) -> bool {
        [self.functional, self.perf, self.accuracy].contains(&PhaseStatus::Failed)
    }
}

/// Aggregated perf gauges plus renamed per-row records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerfMetrics {
    #[serde(flatten)]
    pub aggregates: BTreeMap<String, f64>,
    pub records: Vec<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<PerfMode>,
}

/// Structured outcome of one scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestrationResult {
    pub scenario: String,
    pub run_type: RunType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ProbeResult>,
    pub status: PhaseReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functional_report: Option<SuiteResult>,
    pub perf_metrics: PerfMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<AccuracyResult>,
    /// Stage-local failures that did not stop the pipeline
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub phase_errors: BTreeMap<Stage, String>,
    pub pushed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<PathBuf>,
    /// Set when the scenario ended in `Failed(stage)`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    pub elapsed_s: f64,
}

impl OrchestrationResult {
    pub fn new(scenario: &str, run_type: RunType) -> Self {
        Self {
            scenario: scenario.to_string(),
            run_type,
            base_url: None,
            readiness: None,
            status: PhaseReport::default(),
            functional_report: None,
            perf_metrics: PerfMetrics::default(),
            accuracy: None,
            phase_errors: BTreeMap::new(),
            pushed: false,
            artifacts: None,
            error: None,
            failed_stage: None,
            elapsed_s: 0.0,
        }
    }

    /// Synthetic result standing in for a scenario that raised
    pub fn failed(scenario: &str, run_type: RunType, error: &OrchestratorError) -> Self {
        Self {
            error: Some(error.to_string()),
            failed_stage: error.stage(),
            ..Self::new(scenario, run_type)
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Terminal failure or any failed phase
    pub fn has_failures(&self) -> bool {
        !self.is_success() || self.status.any_failed()
    }
}

/// Anything that can run one scenario of a matrix
#[async_trait]
pub trait ScenarioRunner: Send + Sync {
    async fn run_scenario(
        &self,
        scenario_id: &str,
        plan: &Plan,
        options: &RunOptions,
    ) -> Result<OrchestrationResult>;
}

/// External collaborators injected into the pipeline
#[derive(Clone)]
pub struct Collaborators {
    pub api: Arc<dyn CompletionApi>,
    pub probe: Arc<dyn HttpProbe>,
    pub discovery: Arc<dyn ServiceDiscovery>,
    pub publisher: MetricsPublisher,
}

/// Inputs resolved before any network activity
#[derive(Default)]
struct PreparedRun {
    cases: Vec<TestCase>,
    capabilities: CapabilitySet,
    per_case_metrics: bool,
    profile: PerfProfile,
    accuracy: Option<(AccuracyConfig, Vec<AccuracySample>)>,
}

/// Composes locator, probe, suites and publisher into the fixed scenario sequence
#[derive(Clone)]
pub struct ScenarioPipeline {
    scenarios: Arc<ScenarioRegistry>,
    layout: RepoLayout,
    env: RunEnv,
    locator: ServiceLocator,
    readiness: ReadinessProbe,
    functional: FunctionalRunner,
    load: LoadEngine,
    accuracy: AccuracyEvaluator,
    publisher: MetricsPublisher,
    launcher: ServiceLauncher,
    artifacts: Option<ArtifactWriter>,
    job: String,
    success_status: u16,
}

impl ScenarioPipeline {
    pub fn new(
        collaborators: Collaborators,
        scenarios: ScenarioRegistry,
        layout: RepoLayout,
        env: RunEnv,
    ) -> Self {
        let Collaborators {
            api,
            probe,
            discovery,
            publisher,
        } = collaborators;
        Self {
            scenarios: Arc::new(scenarios),
            launcher: ServiceLauncher::new(layout.root()),
            layout,
            env,
            locator: ServiceLocator::new(discovery),
            readiness: ReadinessProbe::new(probe),
            functional: FunctionalRunner::new(api.clone()),
            load: LoadEngine::new(api.clone()),
            accuracy: AccuracyEvaluator::new(api),
            publisher,
            artifacts: None,
            job: DEFAULT_JOB.to_string(),
            success_status: 200,
        }
    }

    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.readiness = self.readiness.with_policy(policy);
        self
    }

    pub fn with_launcher(mut self, launcher: ServiceLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_artifacts_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.artifacts = dir.map(ArtifactWriter::new);
        self
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }

    pub fn scenarios(&self) -> &ScenarioRegistry {
        &self.scenarios
    }

    /// Run one scenario through every stage its plan selects
    pub async fn execute(
        &self,
        scenario: &Scenario,
        plan: &Plan,
        options: &RunOptions,
    ) -> Result<OrchestrationResult> {
        let started = Instant::now();
        let id = scenario.id.as_str();
        info!(scenario = %id, run_type = %options.run_type, mode = %scenario.mode, "Starting scenario");

        let prepared = self
            .prepare(scenario, plan, options.run_type)
            .map_err(|e| OrchestratorError::scenario_failed(id, Stage::Planning, e))?;
        let mut result = OrchestrationResult::new(id, options.run_type);

        // Discovering
        let base_url = self
            .locator
            .resolve(scenario)
            .await
            .map_err(|e| OrchestratorError::scenario_failed(id, Stage::Discovery, e))?;
        info!(scenario = %id, base_url = %base_url, "Resolved service");
        result.base_url = Some(base_url.clone());

        // Probing
        let service = if self.autostart_enabled(scenario) {
            let service = self
                .launcher
                .start(scenario)
                .await
                .map_err(|e| OrchestratorError::scenario_failed(id, Stage::Probing, e))?;
            Some(service)
        } else {
            None
        };

        let max_wait = probe_timeout(scenario, options.timeout);
        let probe_url = join_url(&base_url, &scenario.health_path);
        let readiness = self
            .readiness
            .wait_ready(&probe_url, max_wait, self.success_status)
            .await;
        let ready = readiness.ready;
        result.readiness = Some(readiness);

        if !ready {
            if let Some(service) = service {
                if let Err(e) = service.stop().await {
                    warn!(scenario = %id, error = %e, "Failed to stop service");
                }
                return Err(OrchestratorError::scenario_failed(
                    id,
                    Stage::Probing,
                    Error::timeout(format!(
                        "autostarted service not ready after {}s at {}",
                        max_wait.as_secs_f64(),
                        probe_url
                    )),
                ));
            }
            warn!(scenario = %id, url = %probe_url, "Service not ready, continuing best effort");
        }

        let perf_rows = self
            .run_phases(scenario, plan, options, &base_url, prepared, &mut result)
            .await;

        if let Some(service) = service {
            if let Err(e) = service.stop().await {
                warn!(scenario = %id, error = %e, "Failed to stop service");
            }
        }

        result.elapsed_s = started.elapsed().as_secs_f64();
        self.write_artifacts(&mut result, perf_rows.as_deref());
        info!(
            scenario = %id,
            functional = ?result.status.functional,
            perf = ?result.status.perf,
            accuracy = ?result.status.accuracy,
            pushed = result.pushed,
            "Scenario finished"
        );
        Ok(result)
    }

    /// Functional, perf and accuracy phases plus publishing; never fails
    async fn run_phases(
        &self,
        scenario: &Scenario,
        plan: &Plan,
        options: &RunOptions,
        base_url: &str,
        prepared: PreparedRun,
        result: &mut OrchestrationResult,
    ) -> Option<Vec<PerfRow>> {
        let model = scenario.served_model_name.as_str();
        let labels = scenario_labels(scenario);

        // Functional
        if plan.functional.is_enabled() {
            debug!(scenario = %scenario.id, cases = prepared.cases.len(), "Functional phase");
            let suite = self
                .functional
                .run_suite(base_url, model, &prepared.cases, &prepared.capabilities)
                .await;
            result.status.functional = PhaseStatus::from_ok(suite.is_ok());
            if !suite.is_ok() {
                result.phase_errors.insert(
                    Stage::Functional,
                    format!(
                        "{} of {} cases failed",
                        suite.summary.failed, suite.summary.total
                    ),
                );
            }
            result.functional_report = Some(suite);
        }

        // Perf
        let mut perf_rows = None;
        if plan.perf {
            let mode = self.env.perf_mode;
            debug!(scenario = %scenario.id, mode = mode.as_str(), "Perf phase");
            let rows = match mode {
                PerfMode::Mock => Ok(mock_rows()),
                PerfMode::Real => self.load.run_profile(base_url, model, &prepared.profile).await,
            };
            match rows {
                Ok(rows) => {
                    let served = rows.iter().any(|r| r.throughput_rps > 0.0);
                    result.status.perf = PhaseStatus::from_ok(served);
                    if !served {
                        result
                            .phase_errors
                            .insert(Stage::Perf, "no request succeeded".to_string());
                    }
                    result.perf_metrics = PerfMetrics {
                        aggregates: perf_metrics(&rows),
                        records: rows
                            .iter()
                            .map(|r| rename_record_keys(r.to_record(), DEFAULT_MAPPING))
                            .collect(),
                        mode: Some(mode),
                    };
                    perf_rows = Some(rows);
                }
                Err(e) => {
                    warn!(scenario = %scenario.id, error = %e, "Perf phase failed");
                    result.status.perf = PhaseStatus::Failed;
                    result.perf_metrics.mode = Some(mode);
                    result.phase_errors.insert(Stage::Perf, e.to_string());
                }
            }
        }

        // Publish functional totals and perf aggregates
        if options.publishes() {
            let mut metrics = result.perf_metrics.aggregates.clone();
            if let Some(suite) = &result.functional_report {
                metrics.extend(functional_metrics(suite));
            }
            result.pushed |= self.publish(&metrics, &labels, options).await;

            if prepared.per_case_metrics {
                if let Some(suite) = &result.functional_report {
                    for (case_id, case_metrics) in functional_case_metrics(suite) {
                        let mut case_labels = labels.clone();
                        case_labels.insert("case_id".to_string(), case_id);
                        result.pushed |= self.publish(&case_metrics, &case_labels, options).await;
                    }
                }
            }
        }

        // Accuracy
        if let Some((cfg, samples)) = prepared.accuracy {
            debug!(scenario = %scenario.id, samples = samples.len(), "Accuracy phase");
            match self.accuracy.evaluate(base_url, model, &samples, &cfg).await {
                Ok(accuracy) => {
                    result.status.accuracy = PhaseStatus::from_ok(accuracy.ok);
                    if options.publishes() {
                        let mut accuracy_labels = labels.clone();
                        accuracy_labels.insert("task".to_string(), accuracy.task.clone());
                        result.pushed |= self
                            .publish(&accuracy_metrics(&accuracy), &accuracy_labels, options)
                            .await;
                    }
                    result.accuracy = Some(accuracy);
                }
                Err(e) => {
                    warn!(scenario = %scenario.id, error = %e, "Accuracy phase failed");
                    result.status.accuracy = PhaseStatus::Failed;
                    result.phase_errors.insert(Stage::Accuracy, e.to_string());
                }
            }
        }

        perf_rows
    }

    async fn publish(
        &self,
        metrics: &BTreeMap<String, f64>,
        labels: &BTreeMap<String, String>,
        options: &RunOptions,
    ) -> bool {
        self.publisher
            .publish(
                &self.job,
                metrics,
                labels,
                options.run_type,
                self.env.pushgateway_url.as_deref(),
                options.dry_run,
            )
            .await
    }

    fn autostart_enabled(&self, scenario: &Scenario) -> bool {
        scenario.mode == ScenarioMode::Local && (self.env.autostart || scenario.autostart)
    }

    /// Load suite inputs; every configuration error surfaces here
    fn prepare(
        &self,
        scenario: &Scenario,
        plan: &Plan,
        run_type: RunType,
    ) -> cibench_core::Result<PreparedRun> {
        let mut prepared = PreparedRun::default();

        if plan.functional.is_enabled() {
            let config = self.functional_config()?;
            let mut cases = if config.enabled {
                select_cases(build_cases(&config)?, &plan.functional)?
            } else {
                Vec::new()
            };
            if cases.is_empty() {
                cases.push(TestCase::smoke());
            }
            let features = capabilities_from_features(scenario);
            prepared.capabilities = CapabilitySet::merge([
                self.env.capabilities.as_slice(),
                config.capabilities.as_slice(),
                features.as_slice(),
            ]);
            prepared.per_case_metrics = config.functional_metrics.per_case;
            prepared.cases = cases;
        }

        if plan.perf && self.env.perf_mode == PerfMode::Real {
            prepared.profile = self.layout.load_perf_profile(run_type)?;
        }

        if plan.accuracy {
            let cfg = self.accuracy_config(scenario)?;
            let samples = load_samples(&cfg)?;
            prepared.accuracy = Some((cfg, samples));
        }

        Ok(prepared)
    }

    fn functional_config(&self) -> cibench_core::Result<FunctionalConfig> {
        match &self.env.functional_config {
            Some(path) => FunctionalConfig::load_from_file(path),
            None => load_if_present(&self.layout.functional_path(), |p| FunctionalConfig::load_from_file(p)),
        }
    }

    /// Scenario settings win over the override path, which wins over the shared file
    fn accuracy_config(&self, scenario: &Scenario) -> cibench_core::Result<AccuracyConfig> {
        if let Some(cfg) = &scenario.accuracy {
            cfg.validate()?;
            return Ok(cfg.clone());
        }
        match &self.env.accuracy_config {
            Some(path) => AccuracyConfig::load_from_file(path),
            None => load_if_present(&self.layout.accuracy_path(), |p| AccuracyConfig::load_from_file(p)),
        }
    }

    fn write_artifacts(&self, result: &mut OrchestrationResult, perf_rows: Option<&[PerfRow]>) {
        let Some(writer) = &self.artifacts else {
            return;
        };
        result.artifacts = Some(writer.scenario_dir(&result.scenario));

        let mut outcomes = Vec::new();
        if let Some(rows) = perf_rows {
            outcomes.push(writer.write_perf_csv(&result.scenario, rows));
        }
        if let Some(accuracy) = &result.accuracy {
            outcomes.push(writer.write_accuracy(&result.scenario, accuracy));
        }
        outcomes.push(writer.write_result(result));

        for outcome in outcomes {
            if let Err(e) = outcome {
                warn!(scenario = %result.scenario, error = %e, "Failed to write artifact");
            }
        }
    }
}

#[async_trait]
impl ScenarioRunner for ScenarioPipeline {
    async fn run_scenario(
        &self,
        scenario_id: &str,
        plan: &Plan,
        options: &RunOptions,
    ) -> Result<OrchestrationResult> {
        let scenario = self
            .scenarios
            .get(scenario_id)
            .map_err(|e| OrchestratorError::scenario_failed(scenario_id, Stage::Planning, e))?;
        self.execute(scenario, plan, options).await
    }
}

fn load_if_present<T: Default>(
    path: &Path,
    load: impl FnOnce(&Path) -> cibench_core::Result<T>,
) -> cibench_core::Result<T> {
    if path.exists() {
        load(path)
    } else {
        debug!(path = %path.display(), "Config file absent, using defaults");
        Ok(T::default())
    }
}

/// Override or scenario startup timeout, never below one second
fn probe_timeout(scenario: &Scenario, timeout: Option<Duration>) -> Duration {
    timeout
        .unwrap_or(Duration::from_secs(scenario.startup_timeout_seconds))
        .max(Duration::from_secs(1))
}

fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
