//! Scenario listing command

use super::CommandContext;
use crate::output::{yes_no, Formattable, OutputFormatter};
use anyhow::{Context, Result};
use cibench_core::{Scenario, ScenarioRegistry};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ScenarioRow {
    pub id: String,
    pub mode: String,
    pub model: String,
    pub served_model_name: String,
    pub quant: String,
    /// Base URL for local scenarios, `namespace/service` for cluster ones
    pub target: String,
    pub features: Vec<String>,
    pub in_matrix: bool,
}

impl ScenarioRow {
    fn new(scenario: &Scenario, in_matrix: bool) -> Self {
        let target = match (&scenario.base_url, &scenario.k8s) {
            (Some(url), _) if !url.is_empty() => url.clone(),
            (_, Some(k8s)) => format!(
                "{}/{}",
                k8s.namespace,
                k8s.service_name.as_deref().unwrap_or("-")
            ),
            _ => "-".to_string(),
        };
        Self {
            id: scenario.id.clone(),
            mode: scenario.mode.to_string(),
            model: scenario.model.clone(),
            served_model_name: scenario.served_model_name.clone(),
            quant: scenario.quant.clone(),
            target,
            features: scenario.enabled_features().map(str::to_string).collect(),
            in_matrix,
        }
    }
}

impl Formattable for ScenarioRow {
    fn table_headers() -> Vec<String> {
        ["ID", "Mode", "Model", "Served As", "Quant", "Target", "Features", "In Matrix"]
            .iter()
            .map(|h| h.to_string())
            .collect()
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.mode.clone(),
            self.model.clone(),
            self.served_model_name.clone(),
            self.quant.clone(),
            self.target.clone(),
            self.features.join(","),
            yes_no(self.in_matrix),
        ]
    }
}

pub fn scenario_rows(
    registry: &ScenarioRegistry,
    in_matrix: impl Fn(&str) -> bool,
) -> Vec<ScenarioRow> {
    registry
        .iter()
        .map(|s| ScenarioRow::new(s, in_matrix(&s.id)))
        .collect()
}

pub fn list_scenarios(ctx: &CommandContext) -> Result<bool> {
    let registry = ctx.layout.load_scenarios().with_context(|| {
        format!("Failed to load scenarios from {}", ctx.layout.scenarios_dir().display())
    })?;
    let matrix = ctx.matrix_or_default()?;
    let rows = scenario_rows(&registry, |id| matrix.contains(id));
    OutputFormatter::new(ctx.output).print_report(&rows, &rows)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cibench_dev::{k8s_scenario, local_scenario};

    #[test]
    fn test_scenario_rows() {
        let mut local = local_scenario("local_single", "http://127.0.0.1:9000/v1");
        local.features.insert("function_call".to_string(), true);
        local.features.insert("reasoning".to_string(), false);
        let registry: ScenarioRegistry =
            vec![local, k8s_scenario("k8s_hybrid", "infer-svc")].into_iter().collect();

        let rows = scenario_rows(&registry, |id| id == "local_single");
        assert_eq!(rows.len(), 2);

        let hybrid = rows.iter().find(|r| r.id == "k8s_hybrid").unwrap();
        assert_eq!(hybrid.target, "bench/infer-svc");
        assert!(!hybrid.in_matrix);

        let local = rows.iter().find(|r| r.id == "local_single").unwrap();
        assert_eq!(local.target, "http://127.0.0.1:9000/v1");
        assert_eq!(local.features, vec!["function_call"]);
        assert!(local.in_matrix);
    }
}
