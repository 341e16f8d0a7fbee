//! cibench - benchmark harness driver for OpenAI-compatible inference servers

use anyhow::Result;
use cibench_core::{RunType, DEFAULT_JOB};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod client;
mod commands;
mod output;

use client::ClientOptions;
use commands::matrix::MatrixArgs;
use commands::run::RunArgs;
use commands::CommandContext;
use cibench_orchestrator::{BackoffPolicy, RepoLayout};
use output::{OutputFormat, OutputFormatter};

/// Benchmark harness driver for OpenAI-compatible inference servers
#[derive(Debug, Parser)]
#[command(name = "cibench")]
#[command(about = "Run functional, performance and accuracy suites against inference scenarios")]
#[command(version)]
pub struct Cli {
    /// Repository root holding `configs/`
    #[arg(long, value_name = "DIR", default_value = ".", env = "CIBENCH_ROOT")]
    root: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log line format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Bearer token for the inference server
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Timeout for a single completion request in seconds
    #[arg(long, default_value = "600")]
    request_timeout: u64,

    /// Timeout for a metrics push in seconds
    #[arg(long, default_value = "10")]
    push_timeout: u64,

    /// Kubernetes API server; in-cluster service account when omitted
    #[arg(long, env = "KUBE_API_SERVER")]
    kube_api_server: Option<String>,

    /// Bearer token for the Kubernetes API
    #[arg(long, env = "KUBE_TOKEN", hide_env_values = true)]
    kube_token: Option<String>,

    /// Skip TLS verification of the Kubernetes API server
    #[arg(long)]
    kube_insecure: bool,

    /// Push-gateway job name
    #[arg(long, env = "CIBENCH_JOB", default_value = DEFAULT_JOB)]
    job: String,

    /// Longest sleep between readiness probes in seconds
    #[arg(long, default_value = "30")]
    probe_max_interval: u64,

    /// Only publish metrics from runs of this repository (owner/name)
    #[arg(long, env = "CIBENCH_CANONICAL_REPOSITORY")]
    canonical_repository: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the test plan a scenario resolves to
    #[command(name = "plan")]
    Plan {
        /// Scenario identifier
        #[arg(short, long)]
        scenario: String,

        /// Trigger type (pr, daily)
        #[arg(short, long, default_value = "pr")]
        run_type: RunType,
    },

    /// Run one scenario
    #[command(name = "run")]
    Run {
        /// Scenario identifier
        #[arg(short, long)]
        scenario: String,

        /// Trigger type (pr, daily)
        #[arg(short, long, default_value = "pr")]
        run_type: RunType,

        /// Readiness deadline in seconds (defaults to the scenario's startup timeout)
        #[arg(long)]
        timeout: Option<u64>,

        /// Never publish metrics
        #[arg(long)]
        dry_run: bool,

        /// Directory receiving per-scenario artifacts
        #[arg(long, value_name = "DIR")]
        artifacts_dir: Option<PathBuf>,
    },

    /// Run every scenario in the matrix
    #[command(name = "run-matrix")]
    RunMatrix {
        /// Trigger type (pr, daily)
        #[arg(short, long, default_value = "pr")]
        run_type: RunType,

        /// Scenarios run concurrently
        #[arg(short, long, default_value = "1")]
        concurrency: usize,

        /// Per-scenario readiness deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Abort on the first scenario failure
        #[arg(long)]
        fail_fast: bool,

        /// Never publish metrics
        #[arg(long)]
        dry_run: bool,

        /// Directory receiving per-scenario artifacts
        #[arg(long, value_name = "DIR")]
        artifacts_dir: Option<PathBuf>,
    },

    /// List configured scenarios
    #[command(name = "scenarios")]
    Scenarios,
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Default schedule with the sleep capped; a cap below the first sleep lowers both
fn backoff_policy(max_interval_s: u64) -> BackoffPolicy {
    let max = Duration::from_secs(max_interval_s.max(1));
    let defaults = BackoffPolicy::default();
    BackoffPolicy {
        initial: defaults.initial.min(max),
        max,
        ..defaults
    }
}

async fn execute(cli: Cli) -> Result<bool> {
    let ctx = CommandContext {
        layout: RepoLayout::new(&cli.root),
        output: cli.output,
        clients: ClientOptions {
            api_key: cli.api_key,
            request_timeout: Duration::from_secs(cli.request_timeout),
            push_timeout: Duration::from_secs(cli.push_timeout),
            kube_api_server: cli.kube_api_server,
            kube_token: cli.kube_token,
            kube_insecure: cli.kube_insecure,
            canonical_repository: cli.canonical_repository,
        },
        job: cli.job,
        backoff: backoff_policy(cli.probe_max_interval),
    };

    match cli.command {
        Commands::Plan { scenario, run_type } => {
            commands::plan::show_plan(&ctx, &scenario, run_type)
        }

        Commands::Run { scenario, run_type, timeout, dry_run, artifacts_dir } => {
            let args = RunArgs { scenario, run_type, timeout, dry_run, artifacts_dir };
            commands::run::run_scenario(&ctx, args).await
        }

        Commands::RunMatrix { run_type, concurrency, timeout, fail_fast, dry_run, artifacts_dir } => {
            let args = MatrixArgs { run_type, concurrency, timeout, fail_fast, dry_run, artifacts_dir };
            commands::matrix::run_matrix(&ctx, args).await
        }

        Commands::Scenarios => commands::scenarios::list_scenarios(&ctx),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);
    debug!(root = %cli.root.display(), command = ?cli.command, "Starting cibench");

    let output = cli.output;
    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            OutputFormatter::new(output).print_error(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}
