//! Functional suite
//!
//! Cases come from three shapes in the functional config: explicit cases,
//! boundary matrices and negative-path lists. A case whose required capabilities
//! are not all available is skipped without touching the network when it is
//! marked `skip_if_unsupported`.

use cibench_core::{
    CapabilitySet, CaseSpec, CompletionApi, CompletionOutput, Error, FunctionalConfig,
    FunctionalSelector, MatrixSpec, Result,
};

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prompt of the built-in smoke case
pub const SMOKE_PROMPT: &str = "Say hello in one word.";

/// Endpoint a case targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseKind {
    Chat,
    Completion,
}

#[derive(Debug, Clone, PartialEq)]
enum CaseInput {
    Messages(Vec<Value>),
    Prompt(String),
}

/// One request with its expectation
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub id: String,
    input: CaseInput,
    /// Extra request fields (sampling, tools, stream, ...)
    pub params: Map<String, Value>,
    pub expect_error: bool,
    pub required_capabilities: Vec<String>,
    pub skip_if_unsupported: bool,
    /// Fail a success response that carries no choices
    pub require_choices: bool,
}

impl TestCase {
    pub fn chat(id: impl Into<String>, messages: Vec<Value>) -> Self {
        Self::new(id.into(), CaseInput::Messages(messages))
    }

    pub fn completion(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(id.into(), CaseInput::Prompt(prompt.into()))
    }

    fn new(id: String, input: CaseInput) -> Self {
        Self {
            id,
            input,
            params: Map::new(),
            expect_error: false,
            required_capabilities: Vec::new(),
            skip_if_unsupported: true,
            require_choices: false,
        }
    }

    /// Single-turn chat used when a suite has no configured cases
    pub fn smoke() -> Self {
        let mut case = Self::chat("smoke", vec![json!({"role": "user", "content": SMOKE_PROMPT})])
            .with_param("temperature", json!(0));
        case.require_choices = true;
        case
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn expecting_error(mut self) -> Self {
        self.expect_error = true;
        self
    }

    pub fn requiring(mut self, capabilities: &[&str]) -> Self {
        self.required_capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn run_when_unsupported(mut self) -> Self {
        self.skip_if_unsupported = false;
        self
    }

    pub fn kind(&self) -> CaseKind {
        match self.input {
            CaseInput::Messages(_) => CaseKind::Chat,
            CaseInput::Prompt(_) => CaseKind::Completion,
        }
    }

    /// Request body; `model` and the input always override `params`
    pub fn body(&self, model: &str) -> Value {
        let mut body = self.params.clone();
        body.insert("model".to_string(), json!(model));
        match &self.input {
            CaseInput::Messages(messages) => {
                body.insert("messages".to_string(), Value::Array(messages.clone()));
            }
            CaseInput::Prompt(prompt) => {
                body.insert("prompt".to_string(), json!(prompt));
            }
        }
        Value::Object(body)
    }

    fn from_parts(
        id: String,
        kind: &str,
        messages: &[Value],
        prompt: Option<&str>,
        params: Map<String, Value>,
    ) -> Self {
        let case = match kind {
            "completion" | "completions" => {
                TestCase::completion(id, prompt.unwrap_or("Hello"))
            }
            _ => {
                let messages = if messages.is_empty() {
                    vec![json!({"role": "user", "content": SMOKE_PROMPT})]
                } else {
                    messages.to_vec()
                };
                TestCase::chat(id, messages)
            }
        };
        case.with_params(params)
    }

    fn from_spec(spec: &CaseSpec) -> Self {
        let mut case = Self::from_parts(
            spec.id.clone(),
            &spec.kind,
            &spec.messages,
            spec.prompt.as_deref(),
            spec.params.clone(),
        );
        case.expect_error = spec.expect_error;
        case.required_capabilities = spec.required_capabilities.clone();
        case.skip_if_unsupported = spec.skip_if_unsupported;
        case
    }
}

/// Cases for the first and last candidate of each grid parameter
///
/// Parameters are varied one at a time on top of `base_params`; a parameter with
/// a single candidate yields one case.
pub fn boundary_cases(spec: &MatrixSpec) -> Vec<TestCase> {
    let mut cases = Vec::new();
    for (param, candidates) in &spec.params_grid {
        let (Some(first), Some(last)) = (candidates.first(), candidates.last()) else {
            continue;
        };
        let mut bounds = vec![("min", first)];
        if first != last {
            bounds.push(("max", last));
        }
        for (label, value) in bounds {
            let id = if first == last {
                format!("{}-{}", spec.id, param)
            } else {
                format!("{}-{}-{}", spec.id, param, label)
            };
            let mut params = spec.base_params.clone();
            params.insert(param.clone(), value.clone());

            let mut case = TestCase::from_parts(
                id,
                &spec.kind,
                &spec.messages,
                spec.prompt.as_deref(),
                params,
            );
            case.required_capabilities = spec.required_capabilities.clone();
            case.skip_if_unsupported = spec.skip_if_unsupported;
            cases.push(case);
        }
    }
    cases
}

/// Merge explicit, boundary and negative cases into one list
pub fn build_cases(config: &FunctionalConfig) -> Result<Vec<TestCase>> {
    let mut cases: Vec<TestCase> = config.cases.iter().map(TestCase::from_spec).collect();
    cases.extend(config.matrices.iter().flat_map(boundary_cases));
    cases.extend(
        config
            .negative
            .iter()
            .map(|spec| TestCase::from_spec(spec).expecting_error()),
    );

    let mut seen = HashSet::new();
    for case in &cases {
        if !seen.insert(case.id.as_str()) {
            return Err(Error::config(format!("duplicate functional case id: {}", case.id)));
        }
    }
    Ok(cases)
}

/// Apply a plan selector; unknown ids are a configuration error
pub fn select_cases(cases: Vec<TestCase>, selector: &FunctionalSelector) -> Result<Vec<TestCase>> {
    match selector {
        FunctionalSelector::All => Ok(cases),
        FunctionalSelector::Disabled => Ok(Vec::new()),
        FunctionalSelector::Cases(ids) => {
            let known: HashSet<&str> = cases.iter().map(|c| c.id.as_str()).collect();
            let unknown: Vec<&String> = ids.iter().filter(|id| !known.contains(id.as_str())).collect();
            if !unknown.is_empty() {
                return Err(Error::config(format!("plan selects unknown functional cases: {unknown:?}")));
            }
            let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
            Ok(cases.into_iter().filter(|c| wanted.contains(c.id.as_str())).collect())
        }
    }
}

/// Outcome of one case
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    pub id: String,
    pub kind: CaseKind,
    pub ok: bool,
    pub skipped: bool,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_capabilities: Vec<String>,
    pub payload: Option<Value>,
}

impl CaseResult {
    fn passed(case: &TestCase, payload: Value) -> Self {
        Self {
            id: case.id.clone(),
            kind: case.kind(),
            ok: true,
            skipped: false,
            error: None,
            missing_capabilities: Vec::new(),
            payload: Some(payload),
        }
    }

    fn failed(case: &TestCase, error: impl Into<String>) -> Self {
        Self {
            id: case.id.clone(),
            kind: case.kind(),
            ok: false,
            skipped: false,
            error: Some(error.into()),
            missing_capabilities: Vec::new(),
            payload: None,
        }
    }

    fn skipped(case: &TestCase, missing: Vec<String>) -> Self {
        Self {
            id: case.id.clone(),
            kind: case.kind(),
            ok: false,
            skipped: true,
            error: Some(format!("missing capabilities: {}", missing.join(", "))),
            missing_capabilities: missing,
            payload: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SuiteSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Per-case outcomes plus counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuiteResult {
    pub summary: SuiteSummary,
    pub results: Vec<CaseResult>,
}

impl SuiteResult {
    fn from_results(results: Vec<CaseResult>) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.ok).count();
        let skipped = results.iter().filter(|r| r.skipped).count();
        Self {
            summary: SuiteSummary {
                total,
                passed,
                failed: total - passed - skipped,
                skipped,
            },
            results,
        }
    }

    /// No case failed (skips do not count against the suite)
    pub fn is_ok(&self) -> bool {
        self.summary.failed == 0
    }
}

/// Executes functional cases against an OpenAI-compatible API
#[derive(Clone)]
pub struct FunctionalRunner {
    api: Arc<dyn CompletionApi>,
}

impl FunctionalRunner {
    pub fn new(api: Arc<dyn CompletionApi>) -> Self {
        Self { api }
    }

    /// Run cases in order; a case failure never aborts the suite
    pub async fn run_suite(
        &self,
        base_url: &str,
        model: &str,
        cases: &[TestCase],
        capabilities: &CapabilitySet,
    ) -> SuiteResult {
        let mut results = Vec::with_capacity(cases.len());
        for case in cases {
            let missing = capabilities.missing(&case.required_capabilities);
            if !missing.is_empty() && case.skip_if_unsupported {
                debug!(case = %case.id, ?missing, "Skipping unsupported case");
                results.push(CaseResult::skipped(case, missing));
                continue;
            }
            results.push(self.run_case(base_url, model, case).await);
        }

        let suite = SuiteResult::from_results(results);
        info!(
            total = suite.summary.total,
            passed = suite.summary.passed,
            failed = suite.summary.failed,
            skipped = suite.summary.skipped,
            "Functional suite finished"
        );
        suite
    }

    pub async fn run_case(&self, base_url: &str, model: &str, case: &TestCase) -> CaseResult {
        let body = case.body(model);
        let outcome = match case.kind() {
            CaseKind::Chat => self.api.chat_completions(base_url, &body).await,
            CaseKind::Completion => self.api.completions(base_url, &body).await,
        };

        match (outcome, case.expect_error) {
            (Ok(_), true) => CaseResult::failed(case, "expected error but got success"),
            (Err(err), true) => {
                debug!(case = %case.id, error = %err, "Expected error observed");
                CaseResult::passed(case, json!({ "exception": err.to_string() }))
            }
            (Ok(output), false) if case.require_choices => match check_choices(&output) {
                Ok(()) => CaseResult::passed(case, output.into_value()),
                Err(err) => CaseResult::failed(case, err.to_string()),
            },
            (Ok(output), false) => CaseResult::passed(case, output.into_value()),
            (Err(err), false) => {
                warn!(case = %case.id, error = %err, "Case failed");
                CaseResult::failed(case, err.to_string())
            }
        }
    }
}

fn check_choices(output: &CompletionOutput) -> Result<()> {
    let has_choices = match output {
        CompletionOutput::Json(value) => value
            .get("choices")
            .and_then(Value::as_array)
            .is_some_and(|c| !c.is_empty()),
        CompletionOutput::Stream(chunks) => !chunks.is_empty(),
    };
    if has_choices {
        Ok(())
    } else {
        Err(Error::missing_field("choices"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cibench_dev::{setup_test_logging, MockCompletionApi, MockReply};
    use std::collections::BTreeMap;

    const BASE: &str = "http://mock:8000/v1";

    fn runner(api: &MockCompletionApi) -> FunctionalRunner {
        FunctionalRunner::new(Arc::new(api.clone()))
    }

    #[tokio::test]
    async fn test_unsupported_case_is_skipped_without_request() {
        setup_test_logging();
        let api = MockCompletionApi::new();
        let case = TestCase::chat("logprobs", vec![json!({"role": "user", "content": "hi"})])
            .with_param("logprobs", json!(true))
            .requiring(&["chat.logprobs"]);

        let suite = runner(&api)
            .run_suite(BASE, "m", &[case], &CapabilitySet::new())
            .await;

        assert_eq!(
            suite.summary,
            SuiteSummary { total: 1, passed: 0, failed: 0, skipped: 1 }
        );
        assert_eq!(suite.results[0].missing_capabilities, vec!["chat.logprobs"]);
        assert_eq!(api.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_case_runs_when_not_skippable() {
        let api = MockCompletionApi::new();
        let case = TestCase::smoke().requiring(&["chat.tools"]).run_when_unsupported();

        let suite = runner(&api).run_suite(BASE, "m", &[case], &CapabilitySet::new()).await;
        assert_eq!(suite.summary.passed, 1);
        assert_eq!(api.chat_calls(), 1);
    }

    #[tokio::test]
    async fn test_expect_error_semantics() {
        let api = MockCompletionApi::builder()
            .then_chat(MockReply::HttpError(400, "n must be positive".to_string()))
            .then_chat(MockReply::Transport("connection reset".to_string()))
            .build();
        let cases = vec![
            TestCase::smoke().expecting_error(),
            TestCase::chat("plain", vec![json!({"role": "user", "content": "x"})]),
            TestCase::chat("negative-ok", vec![json!({"role": "user", "content": "x"})]).expecting_error(),
        ];

        let suite = runner(&api).run_suite(BASE, "m", &cases, &CapabilitySet::new()).await;

        assert!(suite.results[0].ok);
        assert!(suite.results[0].payload.as_ref().unwrap()["exception"]
            .as_str()
            .unwrap()
            .contains("400"));
        assert!(!suite.results[1].ok);
        assert_eq!(
            suite.results[2].error.as_deref(),
            Some("expected error but got success")
        );
        assert_eq!(
            suite.summary,
            SuiteSummary { total: 3, passed: 1, failed: 2, skipped: 0 }
        );
    }

    #[tokio::test]
    async fn test_success_without_choices_fails() {
        let api = MockCompletionApi::builder()
            .chat_default(MockReply::Json(json!({"id": "x", "choices": []})))
            .build();
        let suite = runner(&api)
            .run_suite(BASE, "m", &[TestCase::smoke()], &CapabilitySet::new())
            .await;
        assert_eq!(suite.summary.failed, 1);
        assert!(!suite.is_ok());
    }

    #[tokio::test]
    async fn test_plain_case_passes_without_choices() {
        let api = MockCompletionApi::builder()
            .chat_default(MockReply::Json(json!({"id": "x", "object": "chat.completion"})))
            .build();
        let case = TestCase::chat("plain", vec![json!({"role": "user", "content": "hi"})]);
        assert!(!case.require_choices);

        let suite = runner(&api).run_suite(BASE, "m", &[case], &CapabilitySet::new()).await;

        assert_eq!(
            suite.summary,
            SuiteSummary { total: 1, passed: 1, failed: 0, skipped: 0 }
        );
        assert!(suite.results[0].error.is_none());
    }

    #[tokio::test]
    async fn test_completion_case_hits_completions_endpoint() {
        let api = MockCompletionApi::new();
        let case = TestCase::completion("suffix", "def add(a, b):").with_param("max_tokens", json!(8));

        let suite = runner(&api).run_suite(BASE, "served", &[case], &CapabilitySet::new()).await;

        assert!(suite.is_ok());
        assert_eq!(api.completion_calls(), 1);
        let body = &api.completion_requests().await[0];
        assert_eq!(body["model"], "served");
        assert_eq!(body["prompt"], "def add(a, b):");
        assert_eq!(body["max_tokens"], 8);
    }

    #[test]
    fn test_boundary_matrix_uses_first_and_last() {
        let mut grid = BTreeMap::new();
        grid.insert("temperature".to_string(), vec![json!(0.0), json!(1.0)]);
        let spec = MatrixSpec {
            id: "temp".to_string(),
            kind: "chat".to_string(),
            messages: Vec::new(),
            prompt: None,
            base_params: Map::new(),
            params_grid: grid,
            required_capabilities: Vec::new(),
            skip_if_unsupported: true,
        };

        let cases = boundary_cases(&spec);
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].params["temperature"], json!(0.0));
        assert_eq!(cases[1].params["temperature"], json!(1.0));
    }

    #[test]
    fn test_boundary_matrix_is_not_a_product() {
        let yaml = r#"
id: sampling
base_params: {max_tokens: 4}
params_grid:
  temperature: [0.0, 0.5, 1.0]
  top_p: [0.1, 0.9, 1.0]
  n: [1]
"#;
        let spec: MatrixSpec = serde_yaml::from_str(yaml).unwrap();

        let cases = boundary_cases(&spec);
        let ids: Vec<&str> = cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "sampling-n",
                "sampling-temperature-min",
                "sampling-temperature-max",
                "sampling-top_p-min",
                "sampling-top_p-max"
            ]
        );
        assert!(cases.iter().all(|c| c.params["max_tokens"] == json!(4)));
        assert!(!cases[1].params.contains_key("top_p"));
    }

    #[test]
    fn test_build_and_select_cases() {
        let cfg = FunctionalConfig {
            cases: vec![case_spec("basic"), case_spec("tools")],
            negative: vec![case_spec("bad-n")],
            ..FunctionalConfig::default()
        };

        let cases = build_cases(&cfg).unwrap();
        assert_eq!(cases.len(), 3);
        assert!(cases[2].expect_error);

        let picked = select_cases(
            cases.clone(),
            &FunctionalSelector::Cases(vec!["tools".to_string()]),
        )
        .unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, "tools");

        assert!(select_cases(cases.clone(), &FunctionalSelector::Cases(vec!["nope".to_string()])).is_err());
        assert!(select_cases(cases, &FunctionalSelector::Disabled).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_case_ids_rejected() {
        let cfg = FunctionalConfig {
            cases: vec![case_spec("dup")],
            negative: vec![case_spec("dup")],
            ..FunctionalConfig::default()
        };
        assert!(matches!(build_cases(&cfg), Err(Error::InvalidConfiguration(_))));
    }

    fn case_spec(id: &str) -> CaseSpec {
        CaseSpec {
            id: id.to_string(),
            kind: "chat".to_string(),
            messages: vec![json!({"role": "user", "content": "hi"})],
            prompt: None,
            params: Map::new(),
            expect_error: false,
            required_capabilities: Vec::new(),
            skip_if_unsupported: true,
        }
    }
}
