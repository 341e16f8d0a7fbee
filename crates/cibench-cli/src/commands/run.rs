//! Single-scenario run command

use super::{CommandContext, ResultRow};
use crate::output::OutputFormatter;
use anyhow::Result;
use cibench_core::RunType;
use cibench_orchestrator::{OrchestrationResult, RunOptions, ScenarioRunner};
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub scenario: String,
    pub run_type: RunType,
    pub timeout: Option<u64>,
    pub dry_run: bool,
    pub artifacts_dir: Option<PathBuf>,
}

/// Run one scenario; `Ok(false)` when it or any of its phases failed
pub async fn run_scenario(ctx: &CommandContext, args: RunArgs) -> Result<bool> {
    let pipeline = ctx.pipeline(args.artifacts_dir.clone())?;
    let matrix = ctx.matrix_or_default()?;
    let plan = matrix.resolve_plan(&args.scenario, args.run_type);
    let options = RunOptions::new(args.run_type)
        .with_timeout(args.timeout.map(Duration::from_secs))
        .with_dry_run(args.dry_run);

    let result = match pipeline.run_scenario(&args.scenario, &plan, &options).await {
        Ok(result) => result,
        Err(e) => {
            error!(scenario = %args.scenario, error = %e, "Scenario failed");
            OrchestrationResult::failed(&args.scenario, args.run_type, &e)
        }
    };
    report(ctx, &result)
}

fn report(ctx: &CommandContext, result: &OrchestrationResult) -> Result<bool> {
    let formatter = OutputFormatter::new(ctx.output);
    formatter.print_report(result, &[ResultRow::from(result)])?;

    let success = !result.has_failures();
    let message = if success {
        format!("Scenario {} passed", result.scenario)
    } else {
        format!("Scenario {} failed", result.scenario)
    };
    formatter.print_summary(&message, success);
    Ok(success)
}
