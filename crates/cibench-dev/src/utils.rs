//! Test utilities

use cibench_core::{K8sParams, Scenario, ScenarioMode};
use std::collections::BTreeMap;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize test logging
pub fn setup_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cibench_dev=debug,cibench_suites=debug,cibench_metrics=debug,cibench_orchestrator=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Local scenario pointing at `base_url`
pub fn local_scenario(id: &str, base_url: &str) -> Scenario {
    Scenario {
        id: id.to_string(),
        mode: ScenarioMode::Local,
        model: "qwen3-32b".to_string(),
        served_model_name: "qwen3".to_string(),
        quant: "w8a8".to_string(),
        features: BTreeMap::new(),
        base_url: Some(base_url.to_string()),
        k8s: None,
        pd: BTreeMap::new(),
        health_path: "/models".to_string(),
        startup_timeout_seconds: 5,
        env: BTreeMap::new(),
        args: BTreeMap::new(),
        autostart: false,
        start_command: Vec::new(),
        accuracy: None,
    }
}

/// Hybrid-mode scenario for `service_name` in the `bench` namespace
pub fn k8s_scenario(id: &str, service_name: &str) -> Scenario {
    Scenario {
        mode: ScenarioMode::K8sHybrid,
        base_url: None,
        k8s: Some(K8sParams {
            namespace: "bench".to_string(),
            service_name: Some(service_name.to_string()),
            ..K8sParams::default()
        }),
        ..local_scenario(id, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_validate() {
        setup_test_logging();
        local_scenario("a", "http://127.0.0.1:8000/v1").validate().unwrap();
        k8s_scenario("b", "infer").validate().unwrap();
    }
}
