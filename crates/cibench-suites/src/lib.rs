//! # cibench-suites
//!
//! The three test phases run against a deployed server:
//!
//! - [`functional`]: request/response cases with capability skipping
//! - [`perf`]: concurrent load batches, percentiles and CSV rows
//! - [`accuracy`]: labeled question replay and scoring

pub mod accuracy;
pub mod functional;
pub mod perf;

pub use accuracy::{load_samples, AccuracyEvaluator, AccuracyResult};
pub use functional::{build_cases, select_cases, CaseResult, FunctionalRunner, SuiteResult, SuiteSummary, TestCase};
pub use perf::{compute_summary, mock_rows, percentile, LoadEngine, PerfRow, PerfSummary};
