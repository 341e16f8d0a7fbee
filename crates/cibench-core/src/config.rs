//! Configuration schema for scenarios, matrices and test profiles
//!
//! Every file-backed structure here is deserialized from YAML and then checked
//! with an explicit `validate()` so configuration problems surface before any
//! network or process activity.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Quantization tags accepted in scenario files
pub const SUPPORTED_QUANT: &[&str] = &["w8a8", "w4a8", "none"];

/// Deployment topology of a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScenarioMode {
    /// A process reachable at a configured base URL
    #[serde(rename = "local")]
    Local,
    /// Single Kubernetes service serving prefill and decode
    #[serde(rename = "k8s-hybrid")]
    K8sHybrid,
    /// Kubernetes prefill/decode disaggregated deployment
    #[serde(rename = "k8s-pd")]
    K8sPd,
}

impl ScenarioMode {
    pub fn is_cluster(&self) -> bool {
        !matches!(self, ScenarioMode::Local)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioMode::Local => "local",
            ScenarioMode::K8sHybrid => "k8s-hybrid",
            ScenarioMode::K8sPd => "k8s-pd",
        }
    }
}

impl fmt::Display for ScenarioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kubernetes service coordinates for cluster modes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sParams {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub service_name: Option<String>,

    #[serde(default = "default_port_name")]
    pub port_name: String,

    /// Path prefix appended to `http://<node>:<port>`
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Explicit node port; skips the service port lookup
    #[serde(default)]
    pub node_port: Option<u16>,
}

impl Default for K8sParams {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            service_name: None,
            port_name: default_port_name(),
            base_path: default_base_path(),
            node_port: None,
        }
    }
}

/// One deployment configuration under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub mode: ScenarioMode,

    /// Display name used in metric labels
    pub model: String,

    /// Value sent as `model` in OpenAI requests
    pub served_model_name: String,

    #[serde(default = "default_quant")]
    pub quant: String,

    /// Feature switches such as `guided_decoding`, `function_call`, `reasoning`
    #[serde(default)]
    pub features: BTreeMap<String, bool>,

    /// Base URL for local mode, e.g. `http://127.0.0.1:9000/v1`
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub k8s: Option<K8sParams>,

    /// Prefill/decode deployment parameters, carried for reporting
    #[serde(default)]
    pub pd: BTreeMap<String, serde_json::Value>,

    /// Health endpoint relative to the base URL
    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: u64,

    /// Environment injected into an autostarted service
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Launch arguments rendered as `--key value`
    #[serde(default)]
    pub args: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub autostart: bool,

    /// Command used to start a local service; empty means `scripts/start_local.sh`
    #[serde(default)]
    pub start_command: Vec<String>,

    /// Scenario-specific accuracy settings, overriding the shared file
    #[serde(default)]
    pub accuracy: Option<AccuracyConfig>,
}

impl Scenario {
    /// Load and validate a single scenario file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let scenario: Scenario = serde_yaml::from_str(&content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::config("scenario id cannot be empty"));
        }
        if self.served_model_name.trim().is_empty() {
            return Err(Error::config(format!(
                "scenario[{}] served_model_name cannot be empty",
                self.id
            )));
        }
        if !SUPPORTED_QUANT.contains(&self.quant.as_str()) {
            return Err(Error::config(format!(
                "scenario[{}] quant must be one of {:?}, got {}",
                self.id, SUPPORTED_QUANT, self.quant
            )));
        }
        match self.mode {
            ScenarioMode::Local => {
                if self.base_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                    return Err(Error::config(format!(
                        "scenario[{}] local mode requires base_url",
                        self.id
                    )));
                }
            }
            ScenarioMode::K8sHybrid | ScenarioMode::K8sPd => {
                let k8s = self.k8s.as_ref().ok_or_else(|| {
                    Error::config(format!("scenario[{}] {} requires k8s section", self.id, self.mode))
                })?;
                if k8s.service_name.as_deref().map_or(true, |s| s.trim().is_empty()) {
                    return Err(Error::config(format!(
                        "scenario[{}] k8s.service_name is required",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Names of the features switched on, in stable order
    pub fn enabled_features(&self) -> impl Iterator<Item = &str> {
        self.features
            .iter()
            .filter(|(_, on)| **on)
            .map(|(name, _)| name.as_str())
    }
}

/// Scenarios keyed by id
#[derive(Debug, Clone, Default)]
pub struct ScenarioRegistry {
    scenarios: BTreeMap<String, Scenario>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.yaml`/`*.yml` file in a directory
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        let mut registry = Self::new();
        for path in paths {
            let scenario = Scenario::load_from_file(&path).map_err(|e| {
                Error::config(format!("failed to load {}: {}", path.display(), e))
            })?;
            debug!(scenario = %scenario.id, path = %path.display(), "Loaded scenario");
            registry.insert(scenario)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, scenario: Scenario) -> Result<()> {
        if self.scenarios.contains_key(&scenario.id) {
            return Err(Error::config(format!("duplicate scenario id: {}", scenario.id)));
        }
        self.scenarios.insert(scenario.id.clone(), scenario);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Scenario> {
        self.scenarios.get(id).ok_or_else(|| {
            Error::config(format!(
                "unknown scenario: {} (known: {:?})",
                id,
                self.scenarios.keys().collect::<Vec<_>>()
            ))
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.scenarios.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.values()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

impl FromIterator<Scenario> for ScenarioRegistry {
    fn from_iter<I: IntoIterator<Item = Scenario>>(iter: I) -> Self {
        Self {
            scenarios: iter.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }
}

/// CI trigger type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Pr,
    Daily,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Pr => "pr",
            RunType::Daily => "daily",
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pr" => Ok(RunType::Pr),
            "daily" => Ok(RunType::Daily),
            other => Err(Error::config(format!("run type must be pr or daily, got {other}"))),
        }
    }
}

/// Which functional cases a plan selects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSelector", into = "RawSelector")]
pub enum FunctionalSelector {
    All,
    Cases(Vec<String>),
    Disabled,
}

impl FunctionalSelector {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, FunctionalSelector::Disabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawSelector {
    Flag(bool),
    Keyword(String),
    List(Vec<String>),
}

impl TryFrom<RawSelector> for FunctionalSelector {
    type Error = String;

    fn try_from(raw: RawSelector) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawSelector::Flag(true) => Ok(FunctionalSelector::All),
            RawSelector::Flag(false) => Ok(FunctionalSelector::Disabled),
            RawSelector::Keyword(k) => match k.trim().to_ascii_lowercase().as_str() {
                "all" | "true" => Ok(FunctionalSelector::All),
                "none" | "false" | "off" => Ok(FunctionalSelector::Disabled),
                other => Err(format!("functional selector must be all, false or a list, got {other}")),
            },
            RawSelector::List(ids) if ids.is_empty() => Ok(FunctionalSelector::Disabled),
            RawSelector::List(ids) => Ok(FunctionalSelector::Cases(ids)),
        }
    }
}

impl From<FunctionalSelector> for RawSelector {
    fn from(selector: FunctionalSelector) -> Self {
        match selector {
            FunctionalSelector::All => RawSelector::Keyword("all".to_string()),
            FunctionalSelector::Cases(ids) => RawSelector::List(ids),
            FunctionalSelector::Disabled => RawSelector::Flag(false),
        }
    }
}

/// Test phases selected for one scenario and run type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default = "default_functional")]
    pub functional: FunctionalSelector,
    #[serde(default = "default_true")]
    pub perf: bool,
    #[serde(default = "default_true")]
    pub accuracy: bool,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            functional: FunctionalSelector::All,
            perf: true,
            accuracy: true,
        }
    }
}

/// Per-scenario plans for each run type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixEntry {
    #[serde(default)]
    pub pr: Option<Plan>,
    #[serde(default)]
    pub daily: Option<Plan>,
}

/// Mapping from scenario id to plans, iterated in stable (sorted) order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Matrix {
    entries: BTreeMap<String, Option<MatrixEntry>>,
}

impl Matrix {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn insert(&mut self, scenario_id: impl Into<String>, entry: MatrixEntry) {
        self.entries.insert(scenario_id.into(), Some(entry));
    }

    /// Ids in sorted order; the file's key order is not kept
    pub fn scenario_ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains(&self, scenario_id: &str) -> bool {
        self.entries.contains_key(scenario_id)
    }

    /// Plan for a scenario and run type; unspecified plans run every phase
    pub fn resolve_plan(&self, scenario_id: &str, run_type: RunType) -> Plan {
        let entry = self.entries.get(scenario_id).and_then(Option::as_ref);
        let plan = entry.and_then(|e| match run_type {
            RunType::Pr => e.pr.clone(),
            RunType::Daily => e.daily.clone(),
        });
        plan.unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Load-test grid settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfProfile {
    #[serde(default = "default_concurrency")]
    pub concurrency: Vec<usize>,

    #[serde(default = "default_length")]
    pub input_length: Vec<usize>,

    #[serde(default = "default_length")]
    pub output_length: Vec<usize>,

    #[serde(default = "default_requests_per_level")]
    pub num_requests_per_concurrency: usize,

    /// Throwaway batches before measurement
    #[serde(default)]
    pub warmup: usize,

    /// Measured batches per concurrency level
    #[serde(default = "default_epochs")]
    pub epochs: usize,

    #[serde(default)]
    pub temperature: f64,
}

impl Default for PerfProfile {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            input_length: default_length(),
            output_length: default_length(),
            num_requests_per_concurrency: default_requests_per_level(),
            warmup: 0,
            epochs: default_epochs(),
            temperature: 0.0,
        }
    }
}

impl PerfProfile {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let profile: PerfProfile = serde_yaml::from_str(&content)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency.is_empty() || self.concurrency.contains(&0) {
            return Err(Error::config("perf concurrency levels must be non-empty and > 0"));
        }
        if self.input_length.is_empty() || self.output_length.is_empty() {
            return Err(Error::config("perf input/output lengths must be non-empty"));
        }
        if self.num_requests_per_concurrency == 0 {
            return Err(Error::config("num_requests_per_concurrency must be > 0"));
        }
        if self.epochs == 0 {
            return Err(Error::config("perf epochs must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::config("perf temperature must be within [0, 2]"));
        }
        Ok(())
    }
}

/// One labeled accuracy question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccuracySample {
    pub question: String,
    #[serde(default)]
    pub choices: Vec<String>,
    pub answer: String,
    #[serde(default, alias = "answer_aliases")]
    pub aliases: Vec<String>,
}

impl AccuracySample {
    pub fn new(question: impl Into<String>, choices: &[&str], answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            choices: choices.iter().map(|c| c.to_string()).collect(),
            answer: answer.into(),
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }
}

/// Side-loaded dataset encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    Json,
    Jsonl,
}

/// Accuracy evaluation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyConfig {
    #[serde(default = "default_task")]
    pub task: String,

    #[serde(default)]
    pub samples: Vec<AccuracySample>,

    /// JSON/JSONL file of `{question, choices, answer, answer_aliases}` records
    #[serde(default)]
    pub samples_file: Option<PathBuf>,

    /// Dataset file whose records may use `answer_idx` into `choices`
    #[serde(default)]
    pub dataset_file: Option<PathBuf>,

    #[serde(default)]
    pub dataset_format: Option<DatasetFormat>,

    /// Truncate the sample list before any request
    #[serde(default)]
    pub max_samples: Option<usize>,

    /// Pass threshold; absent means no gating
    #[serde(default)]
    pub min_score: Option<f64>,

    #[serde(default)]
    pub case_insensitive: bool,

    #[serde(default = "default_true")]
    pub strip: bool,

    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self {
            task: default_task(),
            samples: Vec::new(),
            samples_file: None,
            dataset_file: None,
            dataset_format: None,
            max_samples: None,
            min_score: None,
            case_insensitive: false,
            strip: true,
            max_tokens: None,
        }
    }
}

impl AccuracyConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut cfg: AccuracyConfig = serde_yaml::from_str(&content)?;
        // Relative dataset paths resolve against the config file location.
        if let Some(parent) = path.parent() {
            cfg.samples_file = cfg.samples_file.map(|p| resolve_relative(parent, p));
            cfg.dataset_file = cfg.dataset_file.map(|p| resolve_relative(parent, p));
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(min) = self.min_score {
            if !(0.0..=1.0).contains(&min) {
                return Err(Error::config(format!("min_score must be within [0, 1], got {min}")));
            }
        }
        if self.max_samples == Some(0) {
            return Err(Error::config("max_samples must be > 0 when set"));
        }
        Ok(())
    }
}

/// Free-form declaration of a single functional case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSpec {
    pub id: String,

    /// `chat` (default) or `completion`
    #[serde(default = "default_case_kind", rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub messages: Vec<serde_json::Value>,

    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub expect_error: bool,

    #[serde(default)]
    pub required_capabilities: Vec<String>,

    #[serde(default = "default_true")]
    pub skip_if_unsupported: bool,
}

/// Boundary matrix: only the first and last candidate of each parameter run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixSpec {
    pub id: String,

    #[serde(default = "default_case_kind", rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub messages: Vec<serde_json::Value>,

    #[serde(default)]
    pub prompt: Option<String>,

    /// Parameters shared by every generated case
    #[serde(default)]
    pub base_params: serde_json::Map<String, serde_json::Value>,

    pub params_grid: BTreeMap<String, Vec<serde_json::Value>>,

    #[serde(default)]
    pub required_capabilities: Vec<String>,

    #[serde(default = "default_true")]
    pub skip_if_unsupported: bool,
}

/// Per-case metric publishing switch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionalMetricsConfig {
    #[serde(default)]
    pub per_case: bool,
}

/// Functional suite file (`configs/tests/functional.yaml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Capabilities the deployment is known to support
    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub cases: Vec<CaseSpec>,

    #[serde(default)]
    pub matrices: Vec<MatrixSpec>,

    /// Negative-path cases; always expected to fail
    #[serde(default)]
    pub negative: Vec<CaseSpec>,

    #[serde(default)]
    pub functional_metrics: FunctionalMetricsConfig,
}

impl Default for FunctionalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capabilities: Vec::new(),
            cases: Vec::new(),
            matrices: Vec::new(),
            negative: Vec::new(),
            functional_metrics: FunctionalMetricsConfig::default(),
        }
    }
}

impl FunctionalConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: FunctionalConfig = serde_yaml::from_str(&content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for case in self.cases.iter().chain(self.negative.iter()) {
            validate_case_kind(&case.id, &case.kind)?;
        }
        for matrix in &self.matrices {
            validate_case_kind(&matrix.id, &matrix.kind)?;
            if matrix.params_grid.values().any(Vec::is_empty) {
                return Err(Error::config(format!(
                    "matrix {} has a parameter with no candidate values",
                    matrix.id
                )));
            }
        }
        Ok(())
    }
}

fn validate_case_kind(id: &str, kind: &str) -> Result<()> {
    match kind {
        "chat" | "completion" | "completions" => Ok(()),
        other => Err(Error::config(format!(
            "case {id} has unknown type {other} (expected chat or completion)"
        ))),
    }
}

fn resolve_relative(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_port_name() -> String {
    "http".to_string()
}

fn default_base_path() -> String {
    "/v1".to_string()
}

fn default_health_path() -> String {
    "/models".to_string()
}

fn default_quant() -> String {
    "none".to_string()
}

fn default_startup_timeout() -> u64 {
    1200
}

fn default_functional() -> FunctionalSelector {
    FunctionalSelector::All
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> Vec<usize> {
    vec![1]
}

fn default_length() -> Vec<usize> {
    vec![128]
}

fn default_requests_per_level() -> usize {
    16
}

fn default_epochs() -> usize {
    1
}

fn default_task() -> String {
    "gpqa".to_string()
}

fn default_case_kind() -> String {
    "chat".to_string()
}
