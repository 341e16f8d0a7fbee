//! Matrix scheduling over a bounded worker pool

use crate::error::{OrchestratorError, Result};
use crate::pipeline::{OrchestrationResult, RunOptions, ScenarioRunner};
use cibench_core::{Matrix, Plan, RunType};
use futures::FutureExt;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Matrix-level switches
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixOptions {
    pub run_type: RunType,
    /// Scenario pipelines in flight at once; `<= 1` runs sequentially
    pub concurrency: usize,
    /// Per-scenario readiness deadline
    pub timeout: Option<Duration>,
    /// Record scenario errors instead of aborting the batch
    pub tolerate_failures: bool,
    pub dry_run: bool,
}

impl MatrixOptions {
    pub fn new(run_type: RunType) -> Self {
        Self {
            run_type,
            concurrency: 1,
            timeout: None,
            tolerate_failures: true,
            dry_run: false,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tolerate_failures(mut self, tolerate_failures: bool) -> Self {
        self.tolerate_failures = tolerate_failures;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions::new(self.run_type)
            .with_timeout(self.timeout)
            .with_dry_run(self.dry_run)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatrixSummary {
    pub total: usize,
    /// Scenarios whose result carries no error
    pub success: usize,
    pub failed: usize,
    pub elapsed_s: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

/// Results keyed by scenario id plus a batch summary
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatrixRun {
    pub results: BTreeMap<String, OrchestrationResult>,
    pub summary: MatrixSummary,
}

impl MatrixRun {
    /// Any terminal failure or failed phase across the batch
    pub fn has_failures(&self) -> bool {
        self.results.values().any(OrchestrationResult::has_failures)
    }
}

/// Runs one pipeline per matrix scenario
#[derive(Clone)]
pub struct MatrixScheduler {
    runner: Arc<dyn ScenarioRunner>,
}

impl MatrixScheduler {
    pub fn new(runner: Arc<dyn ScenarioRunner>) -> Self {
        Self { runner }
    }

    pub async fn run(&self, matrix: &Matrix, options: &MatrixOptions) -> Result<MatrixRun> {
        let started = Instant::now();
        let jobs: Vec<(String, Plan)> = matrix
            .scenario_ids()
            .into_iter()
            .map(|id| {
                let plan = matrix.resolve_plan(&id, options.run_type);
                (id, plan)
            })
            .collect();
        info!(
            scenarios = jobs.len(),
            concurrency = options.concurrency,
            run_type = %options.run_type,
            "Starting matrix run"
        );

        let mut run = MatrixRun::default();
        if options.concurrency <= 1 {
            for (id, plan) in jobs {
                let outcome =
                    run_guarded(self.runner.clone(), id.clone(), plan, options.run_options()).await;
                record(&mut run, id, outcome, options)?;
            }
        } else {
            self.run_pooled(jobs, options, &mut run).await?;
        }

        run.summary.total = run.results.len();
        run.summary.success = run.results.values().filter(|r| r.is_success()).count();
        run.summary.failed = run.summary.total - run.summary.success;
        run.summary.elapsed_s = started.elapsed().as_secs_f64();
        info!(
            total = run.summary.total,
            success = run.summary.success,
            failed = run.summary.failed,
            elapsed_s = run.summary.elapsed_s,
            "Matrix run finished"
        );
        Ok(run)
    }

    async fn run_pooled(
        &self,
        jobs: Vec<(String, Plan)>,
        options: &MatrixOptions,
        run: &mut MatrixRun,
    ) -> Result<()> {
        let permits = Arc::new(Semaphore::new(options.concurrency));
        let mut tasks = JoinSet::new();
        let mut pending = BTreeSet::new();

        for (id, plan) in jobs {
            let runner = self.runner.clone();
            let permits = permits.clone();
            let run_options = options.run_options();
            pending.insert(id.clone());
            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => run_guarded(runner, id.clone(), plan, run_options).await,
                    Err(e) => Err(OrchestratorError::TaskPanicked {
                        scenario: id.clone(),
                        reason: e.to_string(),
                    }),
                };
                (id, outcome)
            });
        }

        // Dropping the set on an early return aborts the remaining scenarios
        let mut join_errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    pending.remove(&id);
                    record(run, id, outcome, options)?;
                }
                Err(e) => {
                    error!(error = %e, "Scenario task failed to join");
                    if !options.tolerate_failures {
                        return Err(OrchestratorError::TaskPanicked {
                            scenario: pending.into_iter().collect::<Vec<_>>().join(","),
                            reason: e.to_string(),
                        });
                    }
                    join_errors.push(e.to_string());
                }
            }
        }
        record_unjoined(run, pending, &join_errors, options)
    }
}

/// Scenarios whose task never reported back are recorded as failed
fn record_unjoined(
    run: &mut MatrixRun,
    pending: BTreeSet<String>,
    join_errors: &[String],
    options: &MatrixOptions,
) -> Result<()> {
    let reason = if join_errors.is_empty() {
        "task did not complete".to_string()
    } else {
        join_errors.join("; ")
    };
    for id in pending {
        let err = OrchestratorError::TaskPanicked {
            scenario: id.clone(),
            reason: reason.clone(),
        };
        record(run, id, Err(err), options)?;
    }
    Ok(())
}

/// Run one scenario, converting a panic into an error
async fn run_guarded(
    runner: Arc<dyn ScenarioRunner>,
    id: String,
    plan: Plan,
    options: RunOptions,
) -> Result<OrchestrationResult> {
    debug!(scenario = %id, "Scheduling scenario");
    let fut = async { runner.run_scenario(&id, &plan, &options).await };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(OrchestratorError::TaskPanicked {
            scenario: id.clone(),
            reason: panic_message(panic.as_ref()),
        }),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

fn record(
    run: &mut MatrixRun,
    id: String,
    outcome: Result<OrchestrationResult>,
    options: &MatrixOptions,
) -> Result<()> {
    match outcome {
        Ok(result) => {
            run.results.insert(id, result);
        }
        Err(e) if options.tolerate_failures => {
            warn!(scenario = %id, error = %e, "Scenario failed");
            run.summary.errors.insert(id.clone(), e.to_string());
            run.results
                .insert(id.clone(), OrchestrationResult::failed(&id, options.run_type, &e));
        }
        Err(e) => {
            error!(scenario = %id, error = %e, "Scenario failed, aborting matrix run");
            return Err(e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use async_trait::async_trait;
    use cibench_core::{Error, MatrixEntry};
    use cibench_dev::setup_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Succeeds unless the id is `broken` (error) or `panics`
    #[derive(Default)]
    struct FakeRunner {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl ScenarioRunner for FakeRunner {
        async fn run_scenario(
            &self,
            scenario_id: &str,
            _plan: &Plan,
            options: &RunOptions,
        ) -> Result<OrchestrationResult> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match scenario_id {
                "broken" => Err(OrchestratorError::scenario_failed(
                    scenario_id,
                    Stage::Discovery,
                    Error::discovery("Service not found: bench/broken"),
                )),
                "panics" => panic!("pipeline exploded"),
                _ => Ok(OrchestrationResult::new(scenario_id, options.run_type)),
            }
        }
    }

    fn matrix(ids: &[&str]) -> Matrix {
        let mut matrix = Matrix::default();
        for id in ids {
            matrix.insert(*id, MatrixEntry::default());
        }
        matrix
    }

    #[tokio::test]
    async fn test_sequential_run() {
        setup_test_logging();
        let scheduler = MatrixScheduler::new(Arc::new(FakeRunner::default()));

        let run = scheduler
            .run(&matrix(&["b", "a"]), &MatrixOptions::new(RunType::Pr))
            .await
            .unwrap();

        assert_eq!(run.summary.total, 2);
        assert_eq!(run.summary.success, 2);
        assert_eq!(run.summary.failed, 0);
        assert_eq!(run.results.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(!run.has_failures());
    }

    #[tokio::test]
    async fn test_tolerated_failure_keeps_other_results() {
        let scheduler = MatrixScheduler::new(Arc::new(FakeRunner::default()));
        let options = MatrixOptions::new(RunType::Daily).with_concurrency(2);

        let run = scheduler
            .run(&matrix(&["a", "broken", "c"]), &options)
            .await
            .unwrap();

        assert_eq!(run.summary.total, 3);
        assert_eq!(run.summary.success, 2);
        assert_eq!(run.summary.failed, 1);
        assert!(run.summary.errors["broken"].contains("discovery"));
        let broken = &run.results["broken"];
        assert_eq!(broken.failed_stage, Some(Stage::Discovery));
        assert!(run.results["a"].is_success());
        assert!(run.results["c"].is_success());
        assert!(run.has_failures());
    }

    #[tokio::test]
    async fn test_fail_fast_propagates() {
        let scheduler = MatrixScheduler::new(Arc::new(FakeRunner::default()));
        let options = MatrixOptions::new(RunType::Pr).with_tolerate_failures(false);

        let err = scheduler
            .run(&matrix(&["a", "broken", "c"]), &options)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Discovery));
    }

    #[tokio::test]
    async fn test_pooled_fail_fast_propagates() {
        let scheduler = MatrixScheduler::new(Arc::new(FakeRunner::default()));
        let options = MatrixOptions::new(RunType::Pr)
            .with_concurrency(3)
            .with_tolerate_failures(false);

        let err = scheduler
            .run(&matrix(&["a", "broken", "c"]), &options)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Discovery));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_unjoined_scenarios_count_as_failed() {
        let options = MatrixOptions::new(RunType::Pr).with_concurrency(2);
        let mut run = MatrixRun::default();
        run.results
            .insert("a".to_string(), OrchestrationResult::new("a", RunType::Pr));
        let pending: BTreeSet<String> = ["b".to_string()].into_iter().collect();

        record_unjoined(&mut run, pending, &["task 7 was cancelled".to_string()], &options).unwrap();

        assert_eq!(run.results.len(), 2);
        assert!(!run.results["b"].is_success());
        assert!(run.summary.errors["b"].contains("task 7 was cancelled"));
        assert!(run.has_failures());
    }

    #[test]
    fn test_unjoined_scenarios_abort_when_not_tolerated() {
        let options = MatrixOptions::new(RunType::Pr).with_tolerate_failures(false);
        let mut run = MatrixRun::default();
        let pending: BTreeSet<String> = ["b".to_string()].into_iter().collect();

        let err = record_unjoined(&mut run, pending, &[], &options).unwrap_err();
        assert_eq!(err.category(), "task_panicked");
        assert!(run.results.is_empty());
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let scheduler = MatrixScheduler::new(Arc::new(FakeRunner::default()));

        for concurrency in [1, 3] {
            let options = MatrixOptions::new(RunType::Pr).with_concurrency(concurrency);
            let run = scheduler.run(&matrix(&["a", "panics"]), &options).await.unwrap();

            assert_eq!(run.summary.failed, 1);
            assert!(run.summary.errors["panics"].contains("pipeline exploded"));
            assert!(run.results["a"].is_success());
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let runner = Arc::new(FakeRunner {
            delay: Some(Duration::from_millis(50)),
            ..FakeRunner::default()
        });
        let scheduler = MatrixScheduler::new(runner.clone());
        let options = MatrixOptions::new(RunType::Pr).with_concurrency(2);

        let run = scheduler
            .run(&matrix(&["a", "b", "c", "d", "e"]), &options)
            .await
            .unwrap();

        assert_eq!(run.summary.success, 5);
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
        assert!(runner.peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_empty_matrix() {
        let scheduler = MatrixScheduler::new(Arc::new(FakeRunner::default()));
        let run = scheduler
            .run(&Matrix::default(), &MatrixOptions::new(RunType::Pr))
            .await
            .unwrap();
        assert_eq!(run.summary.total, 0);
        assert!(run.summary.errors.is_empty());
        assert!(run.results.is_empty());
    }
}
