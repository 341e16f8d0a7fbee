//! Process-boundary run environment
//!
//! Toggles that influence a run are read once here and passed down explicitly;
//! pipeline code never consults the process environment.

use crate::traits::PublishEnvironment;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Environment variable prefix for harness toggles
pub const ENV_PREFIX: &str = "CIBENCH";

/// Conventional push-gateway variable honoured as a fallback
pub const PUSHGATEWAY_URL_VAR: &str = "PROM_PUSHGATEWAY_URL";

/// CI repository identity variable honoured as a fallback
pub const SOURCE_REPOSITORY_VAR: &str = "GITHUB_REPOSITORY";

/// Load-engine data source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerfMode {
    /// Fixed synthetic dataset, no requests
    #[default]
    Mock,
    /// Live load against the server
    Real,
}

impl PerfMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerfMode::Mock => "mock",
            PerfMode::Real => "real",
        }
    }
}

/// Toggles collected from `CIBENCH_*` variables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunEnv {
    /// Spawn local services before probing
    pub autostart: bool,

    /// Override for `configs/tests/functional.yaml`
    pub functional_config: Option<PathBuf>,

    /// Extra capabilities, highest precedence
    pub capabilities: Vec<String>,

    /// Override for `configs/tests/accuracy.yaml`
    pub accuracy_config: Option<PathBuf>,

    pub perf_mode: PerfMode,

    pub pushgateway_url: Option<String>,

    /// Repository the run originates from, checked by the publish policy
    pub source_repository: Option<String>,
}

impl RunEnv {
    /// Build from the current process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build from an explicit variable set
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("capabilities")
                    .source(Some(vars.clone())),
            )
            .build()?;

        let mut env: RunEnv = settings
            .try_deserialize()
            .map_err(|e| Error::config(format!("invalid {ENV_PREFIX}_* environment: {e}")))?;

        env.capabilities = env
            .capabilities
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        if env.pushgateway_url.is_none() {
            env.pushgateway_url = non_empty(vars.get(PUSHGATEWAY_URL_VAR));
        }
        if env.source_repository.is_none() {
            env.source_repository = non_empty(vars.get(SOURCE_REPOSITORY_VAR));
        }

        Ok(env)
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_perf_mode(mut self, mode: PerfMode) -> Self {
        self.perf_mode = mode;
        self
    }

    pub fn with_pushgateway_url(mut self, url: impl Into<String>) -> Self {
        self.pushgateway_url = Some(url.into());
        self
    }

    pub fn publish_environment(&self) -> PublishEnvironment {
        PublishEnvironment {
            source_repository: self.source_repository.clone(),
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_variables() {
        let env = RunEnv::from_vars(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(env, RunEnv::default());
        assert_eq!(env.perf_mode, PerfMode::Mock);
    }

    #[test]
    fn test_prefixed_variables() {
        let env = RunEnv::from_vars([
            ("CIBENCH_AUTOSTART", "true"),
            ("CIBENCH_PERF_MODE", "real"),
            ("CIBENCH_CAPABILITIES", "chat.tools, chat.reasoning,"),
            ("CIBENCH_FUNCTIONAL_CONFIG", "/tmp/functional.yaml"),
            ("UNRELATED", "x"),
        ])
        .unwrap();

        assert!(env.autostart);
        assert_eq!(env.perf_mode, PerfMode::Real);
        assert_eq!(env.capabilities, vec!["chat.tools", "chat.reasoning"]);
        assert_eq!(env.functional_config, Some(PathBuf::from("/tmp/functional.yaml")));
    }

    #[test]
    fn test_conventional_fallbacks() {
        let env = RunEnv::from_vars([
            ("PROM_PUSHGATEWAY_URL", "http://pushgw:9091"),
            ("GITHUB_REPOSITORY", "someone/fork"),
        ])
        .unwrap();
        assert_eq!(env.pushgateway_url.as_deref(), Some("http://pushgw:9091"));
        assert_eq!(
            env.publish_environment().source_repository.as_deref(),
            Some("someone/fork")
        );

        let env = RunEnv::from_vars([
            ("PROM_PUSHGATEWAY_URL", "http://fallback:9091"),
            ("CIBENCH_PUSHGATEWAY_URL", "http://primary:9091"),
        ])
        .unwrap();
        assert_eq!(env.pushgateway_url.as_deref(), Some("http://primary:9091"));
    }

    #[test]
    fn test_invalid_perf_mode() {
        let result = RunEnv::from_vars([("CIBENCH_PERF_MODE", "turbo")]);
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }
}
