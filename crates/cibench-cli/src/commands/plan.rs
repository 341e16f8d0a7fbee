//! Plan resolution command

use super::{describe_selector, CommandContext};
use crate::output::{yes_no, Formattable, OutputFormatter};
use anyhow::Result;
use cibench_core::{FunctionalSelector, Matrix, RunType};
use serde::Serialize;

/// Resolved plan for display
#[derive(Debug, Serialize)]
pub struct PlanView {
    pub scenario: String,
    pub run_type: RunType,
    pub functional: FunctionalSelector,
    pub perf: bool,
    pub accuracy: bool,
    /// False when the plan came from defaults
    pub in_matrix: bool,
}

impl PlanView {
    pub fn resolve(matrix: &Matrix, scenario: &str, run_type: RunType) -> Self {
        let plan = matrix.resolve_plan(scenario, run_type);
        Self {
            scenario: scenario.to_string(),
            run_type,
            functional: plan.functional,
            perf: plan.perf,
            accuracy: plan.accuracy,
            in_matrix: matrix.contains(scenario),
        }
    }
}

impl Formattable for PlanView {
    fn table_headers() -> Vec<String> {
        ["Scenario", "Run Type", "Functional", "Perf", "Accuracy", "In Matrix"]
            .iter()
            .map(|h| h.to_string())
            .collect()
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            self.scenario.clone(),
            self.run_type.to_string(),
            describe_selector(&self.functional),
            yes_no(self.perf),
            yes_no(self.accuracy),
            yes_no(self.in_matrix),
        ]
    }
}

pub fn show_plan(ctx: &CommandContext, scenario: &str, run_type: RunType) -> Result<bool> {
    let matrix = ctx.matrix_or_default()?;
    let view = PlanView::resolve(&matrix, scenario, run_type);
    OutputFormatter::new(ctx.output).print_report(&view, std::slice::from_ref(&view))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATRIX: &str = r#"
local_single:
  pr:
    functional: [basic]
    perf: true
    accuracy: false
  daily:
    functional: all
"#;

    #[test]
    fn test_resolve_from_matrix() {
        let matrix = Matrix::from_yaml(MATRIX).unwrap();

        let pr = PlanView::resolve(&matrix, "local_single", RunType::Pr);
        assert_eq!(pr.functional, FunctionalSelector::Cases(vec!["basic".to_string()]));
        assert!(pr.perf);
        assert!(!pr.accuracy);
        assert!(pr.in_matrix);

        let daily = PlanView::resolve(&matrix, "local_single", RunType::Daily);
        assert_eq!(daily.functional, FunctionalSelector::All);
        assert!(daily.accuracy);
    }

    #[test]
    fn test_unknown_scenario_uses_defaults() {
        let matrix = Matrix::from_yaml(MATRIX).unwrap();
        let view = PlanView::resolve(&matrix, "k8s_pd", RunType::Pr);
        assert!(!view.in_matrix);
        assert_eq!(view.functional, FunctionalSelector::All);
        assert_eq!(view.table_row()[2], "all");
    }
}
