//! Autostart of local services under test

use cibench_core::{Error, Result, Scenario};
use serde_json::Value;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Script started when a scenario has no `start_command`
pub const DEFAULT_START_SCRIPT: &str = "scripts/start_local.sh";

/// Full command line for a scenario: `start_command` (or the default script)
/// followed by `args` rendered as `--key value`.
///
/// `true` renders as a bare flag, `false` and `null` are omitted.
pub fn start_command(scenario: &Scenario, root: &Path) -> Vec<String> {
    let mut command = if scenario.start_command.is_empty() {
        vec![
            "bash".to_string(),
            root.join(DEFAULT_START_SCRIPT).display().to_string(),
        ]
    } else {
        scenario.start_command.clone()
    };

    for (key, value) in &scenario.args {
        let flag = format!("--{}", key.replace('_', "-"));
        match value {
            Value::Bool(true) => command.push(flag),
            Value::Bool(false) | Value::Null => {}
            Value::String(s) => command.extend([flag, s.clone()]),
            other => command.extend([flag, other.to_string()]),
        }
    }
    command
}

/// Spawns scenario services with output captured to a log file
#[derive(Debug, Clone)]
pub struct ServiceLauncher {
    root: PathBuf,
    log_dir: PathBuf,
    grace_period: Duration,
}

impl ServiceLauncher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            log_dir: root.join("artifacts").join("logs"),
            root,
            grace_period: Duration::from_secs(10),
        }
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    /// Time between SIGTERM and a forced kill
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub async fn start(&self, scenario: &Scenario) -> Result<RunningService> {
        let command = start_command(scenario, &self.root);
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::config(format!("scenario[{}] has an empty start command", scenario.id)))?;

        std::fs::create_dir_all(&self.log_dir)?;
        let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        let log_path = self
            .log_dir
            .join(format!("service_{}_{}.log", scenario.id, timestamp));
        let log_file = OpenOptions::new().create(true).append(true).open(&log_path)?;
        let stderr = log_file.try_clone()?;

        let child = Command::new(program)
            .args(args)
            .envs(&scenario.env)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::internal(format!("Failed to start {}: {}", program, e)))?;

        info!(
            scenario = %scenario.id,
            pid = ?child.id(),
            log = %log_path.display(),
            "Started service"
        );
        Ok(RunningService {
            child,
            log_path,
            scenario_id: scenario.id.clone(),
            grace_period: self.grace_period,
        })
    }
}

/// Handle to a spawned service; dropped handles kill the process
#[derive(Debug)]
pub struct RunningService {
    child: Child,
    log_path: PathBuf,
    scenario_id: String,
    grace_period: Duration,
}

impl RunningService {
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// SIGTERM, then kill once the grace period has passed
    pub async fn stop(mut self) -> Result<()> {
        if let Some(status) = self.child.try_wait()? {
            debug!(scenario = %self.scenario_id, %status, "Service already exited");
            return Ok(());
        }

        info!(scenario = %self.scenario_id, "Stopping service");

        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    warn!("Failed to send SIGTERM: {}", e);
                } else {
                    debug!("Sent SIGTERM to service");
                }
            }
        }

        match tokio::time::timeout(self.grace_period, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(scenario = %self.scenario_id, %status, "Service stopped");
            }
            Ok(Err(e)) => {
                error!("Error during graceful shutdown: {}", e);
            }
            Err(_) => {
                warn!("Graceful shutdown timed out, forcing kill");
                if let Err(e) = self.child.kill().await {
                    error!("Failed to kill service: {}", e);
                }
            }
        }
        Ok(())
    }
}
