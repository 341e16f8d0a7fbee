//! Matrix run command

use super::{CommandContext, ResultRow};
use crate::output::OutputFormatter;
use anyhow::{Context, Result};
use cibench_core::RunType;
use cibench_orchestrator::{MatrixOptions, MatrixRun, MatrixScheduler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MatrixArgs {
    pub run_type: RunType,
    pub concurrency: usize,
    pub timeout: Option<u64>,
    pub fail_fast: bool,
    pub dry_run: bool,
    pub artifacts_dir: Option<PathBuf>,
}

impl MatrixArgs {
    pub fn options(&self) -> MatrixOptions {
        MatrixOptions::new(self.run_type)
            .with_concurrency(self.concurrency)
            .with_timeout(self.timeout.map(Duration::from_secs))
            .with_tolerate_failures(!self.fail_fast)
            .with_dry_run(self.dry_run)
    }
}

/// Run every matrix scenario; `Ok(false)` when any scenario or phase failed
pub async fn run_matrix(ctx: &CommandContext, args: MatrixArgs) -> Result<bool> {
    let path = ctx.layout.matrix_path();
    let matrix = ctx
        .layout
        .load_matrix()
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let pipeline = ctx.pipeline(args.artifacts_dir.clone())?;

    let scheduler = MatrixScheduler::new(Arc::new(pipeline));
    let run = scheduler
        .run(&matrix, &args.options())
        .await
        .context("Matrix run aborted")?;
    report(ctx, &run)
}

fn report(ctx: &CommandContext, run: &MatrixRun) -> Result<bool> {
    let formatter = OutputFormatter::new(ctx.output);
    let rows: Vec<ResultRow> = run.results.values().map(ResultRow::from).collect();
    formatter.print_report(run, &rows)?;

    let success = !run.has_failures();
    formatter.print_summary(
        &format!(
            "{}/{} scenarios succeeded in {:.1}s",
            run.summary.success, run.summary.total, run.summary.elapsed_s
        ),
        success,
    );
    Ok(success)
}
