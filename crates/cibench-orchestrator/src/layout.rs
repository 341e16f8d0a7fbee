//! On-disk configuration layout of a benchmark repository

use cibench_core::{Matrix, PerfProfile, Result, RunType, ScenarioRegistry};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Paths under a repository root:
///
/// ```text
/// configs/matrix.yaml
/// configs/scenarios/*.yaml
/// configs/tests/functional.yaml
/// configs/tests/accuracy.yaml
/// configs/tests/perf/{pr,daily}.yaml
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    root: PathBuf,
}

impl RepoLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn configs(&self) -> PathBuf {
        self.root.join("configs")
    }

    pub fn matrix_path(&self) -> PathBuf {
        self.configs().join("matrix.yaml")
    }

    pub fn scenarios_dir(&self) -> PathBuf {
        self.configs().join("scenarios")
    }

    pub fn functional_path(&self) -> PathBuf {
        self.configs().join("tests").join("functional.yaml")
    }

    pub fn accuracy_path(&self) -> PathBuf {
        self.configs().join("tests").join("accuracy.yaml")
    }

    pub fn perf_profile_path(&self, run_type: RunType) -> PathBuf {
        self.configs()
            .join("tests")
            .join("perf")
            .join(format!("{}.yaml", run_type.as_str()))
    }

    pub fn load_matrix(&self) -> Result<Matrix> {
        Matrix::load_from_file(self.matrix_path())
    }

    pub fn load_scenarios(&self) -> Result<ScenarioRegistry> {
        ScenarioRegistry::from_dir(self.scenarios_dir())
    }

    /// Profile for the run type, or the built-in default when no file exists
    pub fn load_perf_profile(&self, run_type: RunType) -> Result<PerfProfile> {
        let path = self.perf_profile_path(run_type);
        if path.exists() {
            PerfProfile::load_from_file(&path)
        } else {
            debug!(path = %path.display(), "No perf profile, using defaults");
            Ok(PerfProfile::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = RepoLayout::new("/repo");
        assert_eq!(layout.matrix_path(), Path::new("/repo/configs/matrix.yaml"));
        assert_eq!(
            layout.perf_profile_path(RunType::Daily),
            Path::new("/repo/configs/tests/perf/daily.yaml")
        );
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepoLayout::new(dir.path());
        std::fs::create_dir_all(layout.scenarios_dir()).unwrap();
        std::fs::create_dir_all(layout.perf_profile_path(RunType::Pr).parent().unwrap()).unwrap();

        std::fs::write(
            layout.scenarios_dir().join("local_single.yaml"),
            "id: local_single\nmode: local\nmodel: qwen3-32b\nserved_model_name: qwen3\nbase_url: http://127.0.0.1:9000/v1\n",
        )
        .unwrap();
        std::fs::write(
            layout.matrix_path(),
            "local_single:\n  pr:\n    functional: all\n    perf: true\n    accuracy: false\n",
        )
        .unwrap();
        std::fs::write(layout.perf_profile_path(RunType::Pr), "concurrency: [1, 4]\n").unwrap();

        let scenarios = layout.load_scenarios().unwrap();
        assert_eq!(scenarios.len(), 1);
        let matrix = layout.load_matrix().unwrap();
        assert!(!matrix.resolve_plan("local_single", RunType::Pr).accuracy);
        assert_eq!(layout.load_perf_profile(RunType::Pr).unwrap().concurrency, vec![1, 4]);
        assert_eq!(layout.load_perf_profile(RunType::Daily).unwrap(), PerfProfile::default());
    }
}
