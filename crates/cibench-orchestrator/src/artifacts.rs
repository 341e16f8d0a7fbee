//! Per-scenario artifact files

use crate::pipeline::OrchestrationResult;
use cibench_core::Result;
use cibench_suites::perf::rows_to_csv;
use cibench_suites::{AccuracyResult, PerfRow};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes `{dir}/{scenario}/result.json`, `perf.csv` and `accuracy/result.json`
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn scenario_dir(&self, scenario_id: &str) -> PathBuf {
        self.dir.join(scenario_id)
    }

    fn write(&self, path: PathBuf, contents: &str) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        debug!(path = %path.display(), "Wrote artifact");
        Ok(path)
    }

    pub fn write_result(&self, result: &OrchestrationResult) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(result)?;
        self.write(self.scenario_dir(&result.scenario).join("result.json"), &json)
    }

    pub fn write_perf_csv(&self, scenario_id: &str, rows: &[PerfRow]) -> Result<PathBuf> {
        self.write(self.scenario_dir(scenario_id).join("perf.csv"), &rows_to_csv(rows))
    }

    pub fn write_accuracy(&self, scenario_id: &str, accuracy: &AccuracyResult) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(accuracy)?;
        self.write(
            self.scenario_dir(scenario_id).join("accuracy").join("result.json"),
            &json,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cibench_core::RunType;
    use cibench_suites::perf::parse_csv;
    use cibench_suites::mock_rows;

    #[test]
    fn test_writes_scenario_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());

        let csv = writer.write_perf_csv("local_single", &mock_rows()).unwrap();
        assert_eq!(parse_csv(&std::fs::read_to_string(csv).unwrap()).unwrap().len(), 2);

        let result = OrchestrationResult::new("local_single", RunType::Pr);
        let path = writer.write_result(&result).unwrap();
        assert_eq!(path, dir.path().join("local_single").join("result.json"));
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["scenario"], "local_single");
        assert_eq!(value["status"]["functional"], "skipped");
    }
}
