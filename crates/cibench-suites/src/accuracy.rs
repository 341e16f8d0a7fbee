//! Accuracy evaluation
//!
//! Replays labeled questions through the chat endpoint at temperature 0 and
//! scores exact matches against the answer or any alias.

use cibench_core::{
    AccuracyConfig, AccuracySample, ChatCompletion, CompletionApi, DatasetFormat, Error, Result,
};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Placeholder samples used when nothing is configured
pub fn builtin_samples() -> Vec<AccuracySample> {
    vec![
        AccuracySample::new("2+2?", &["3", "4"], "4"),
        AccuracySample::new("1+1?", &["2", "3"], "2"),
    ]
}

#[derive(Debug, Deserialize)]
struct DatasetRecord {
    question: String,
    #[serde(default)]
    choices: Vec<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    answer_idx: Option<usize>,
    #[serde(default, alias = "answer_aliases")]
    aliases: Vec<String>,
}

impl DatasetRecord {
    fn into_sample(self, source: &Path, line: usize) -> Result<AccuracySample> {
        let answer = match (self.answer, self.answer_idx) {
            (Some(answer), _) => answer,
            (None, Some(idx)) => self.choices.get(idx).cloned().ok_or_else(|| {
                Error::config(format!(
                    "{} record {}: answer_idx {} out of range for {} choices",
                    source.display(),
                    line,
                    idx,
                    self.choices.len()
                ))
            })?,
            (None, None) => {
                return Err(Error::config(format!(
                    "{} record {}: needs answer or answer_idx",
                    source.display(),
                    line
                )))
            }
        };
        Ok(AccuracySample {
            question: self.question,
            choices: self.choices,
            answer,
            aliases: self.aliases,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonDataset {
    List(Vec<DatasetRecord>),
    Wrapped { samples: Vec<DatasetRecord> },
}

/// Load samples from a JSON array (or `{samples: [...]}`) or JSONL file
pub fn load_dataset(path: &Path, format: Option<DatasetFormat>) -> Result<Vec<AccuracySample>> {
    let format = format.unwrap_or_else(|| {
        match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") => DatasetFormat::Jsonl,
            _ => DatasetFormat::Json,
        }
    });
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read dataset {}: {}", path.display(), e)))?;

    let records: Vec<DatasetRecord> = match format {
        DatasetFormat::Json => match serde_json::from_str(&content)? {
            JsonDataset::List(records) => records,
            JsonDataset::Wrapped { samples } => samples,
        },
        DatasetFormat::Jsonl => content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<std::result::Result<_, _>>()?,
    };

    records
        .into_iter()
        .enumerate()
        .map(|(i, record)| record.into_sample(path, i + 1))
        .collect()
}

/// Resolve the sample list and apply `max_samples`
///
/// Source precedence: inline samples, `samples_file`, `dataset_file`, built-ins.
pub fn load_samples(cfg: &AccuracyConfig) -> Result<Vec<AccuracySample>> {
    let mut samples = if !cfg.samples.is_empty() {
        cfg.samples.clone()
    } else if let Some(path) = &cfg.samples_file {
        load_dataset(path, cfg.dataset_format)?
    } else if let Some(path) = &cfg.dataset_file {
        load_dataset(path, cfg.dataset_format)?
    } else {
        builtin_samples()
    };

    if let Some(max) = cfg.max_samples {
        samples.truncate(max);
    }
    Ok(samples)
}

fn normalize(text: &str, cfg: &AccuracyConfig) -> String {
    let text = if cfg.strip { text.trim() } else { text };
    if cfg.case_insensitive {
        text.to_lowercase()
    } else {
        text.to_string()
    }
}

/// Whether `prediction` matches the answer or an alias after normalization
pub fn is_match(prediction: &str, sample: &AccuracySample, cfg: &AccuracyConfig) -> bool {
    let predicted = normalize(prediction, cfg);
    std::iter::once(&sample.answer)
        .chain(sample.aliases.iter())
        .any(|candidate| normalize(candidate, cfg) == predicted)
}

fn user_prompt(sample: &AccuracySample) -> String {
    format!(
        "Question: {}\nChoices: {}\nAnswer with the choice only.",
        sample.question,
        sample.choices.join(", ")
    )
}

/// Scored outcome of an accuracy run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyResult {
    pub task: String,
    pub score: f64,
    pub correct: usize,
    pub total: usize,
    /// `score >= min_score`, or true when no threshold is configured
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    /// Responses without assistant content
    #[serde(default)]
    pub malformed: usize,
}

impl AccuracyResult {
    fn new(task: &str, correct: usize, total: usize, malformed: usize, min_score: Option<f64>) -> Self {
        let score = if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        };
        Self {
            task: task.to_string(),
            score,
            correct,
            total,
            ok: min_score.map_or(true, |min| score >= min),
            min_score,
            malformed,
        }
    }
}

/// Runs labeled samples against the chat endpoint
#[derive(Clone)]
pub struct AccuracyEvaluator {
    api: Arc<dyn CompletionApi>,
}

impl AccuracyEvaluator {
    pub fn new(api: Arc<dyn CompletionApi>) -> Self {
        Self { api }
    }

    /// One request per sample; transport and HTTP errors abort the evaluation
    pub async fn evaluate(
        &self,
        base_url: &str,
        model: &str,
        samples: &[AccuracySample],
        cfg: &AccuracyConfig,
    ) -> Result<AccuracyResult> {
        let samples = match cfg.max_samples {
            Some(max) if max < samples.len() => &samples[..max],
            _ => samples,
        };

        let mut correct = 0;
        let mut malformed = 0;
        for sample in samples {
            let mut body = json!({
                "model": model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": user_prompt(sample)},
                ],
                "temperature": 0,
            });
            if let (Some(max_tokens), Value::Object(map)) = (cfg.max_tokens, &mut body) {
                map.insert("max_tokens".to_string(), json!(max_tokens));
            }

            let output = self.api.chat_completions(base_url, &body).await?;
            let predicted = ChatCompletion::from_output(&output)
                .and_then(|c| c.first_content().map(str::to_string));
            match predicted {
                Ok(text) if is_match(&text, sample, cfg) => correct += 1,
                Ok(text) => debug!(question = %sample.question, predicted = %text, "Incorrect answer"),
                Err(e) => {
                    warn!(question = %sample.question, error = %e, "Malformed accuracy response");
                    malformed += 1;
                }
            }
        }

        let result = AccuracyResult::new(&cfg.task, correct, samples.len(), malformed, cfg.min_score);
        info!(
            task = %result.task,
            score = result.score,
            correct = result.correct,
            total = result.total,
            ok = result.ok,
            "Accuracy evaluation finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cibench_dev::{chat_completion_json, MockCompletionApi, MockReply};

    fn always_answering_four() -> MockCompletionApi {
        MockCompletionApi::builder()
            .chat_default(MockReply::Json(chat_completion_json("4")))
            .build()
    }

    fn three_samples() -> Vec<AccuracySample> {
        vec![
            AccuracySample::new("2+2?", &["3", "4"], "4"),
            AccuracySample::new("3+3?", &["6", "7"], "6"),
            AccuracySample::new("5-1?", &["4", "5"], "4"),
        ]
    }

    #[tokio::test]
    async fn test_max_samples_limits_requests() {
        let api = always_answering_four();
        let evaluator = AccuracyEvaluator::new(Arc::new(api.clone()));
        let cfg = AccuracyConfig {
            samples: three_samples(),
            max_samples: Some(1),
            ..AccuracyConfig::default()
        };

        let samples = load_samples(&cfg).unwrap();
        let result = evaluator.evaluate("http://mock/v1", "m", &samples, &cfg).await.unwrap();

        assert_eq!(api.chat_calls(), 1);
        assert_eq!(result.total, 1);
        assert_eq!(result.correct, 1);
        assert!(result.ok);
    }

    #[tokio::test]
    async fn test_evaluate_applies_max_samples() {
        let api = always_answering_four();
        let evaluator = AccuracyEvaluator::new(Arc::new(api.clone()));
        let cfg = AccuracyConfig {
            max_samples: Some(2),
            ..AccuracyConfig::default()
        };

        let result = evaluator
            .evaluate("http://mock/v1", "m", &three_samples(), &cfg)
            .await
            .unwrap();
        assert_eq!(api.chat_calls(), 2);
        assert_eq!(result.total, 2);
    }

    #[tokio::test]
    async fn test_threshold_gates_ok() {
        let api = always_answering_four();
        let evaluator = AccuracyEvaluator::new(Arc::new(api));
        let samples = vec![
            AccuracySample::new("2+2?", &["3", "4"], "4"),
            AccuracySample::new("3+3?", &["6", "7"], "6"),
        ];
        let cfg = AccuracyConfig {
            min_score: Some(0.6),
            ..AccuracyConfig::default()
        };

        let result = evaluator.evaluate("http://mock/v1", "m", &samples, &cfg).await.unwrap();
        assert_eq!(result.score, 0.5);
        assert!(!result.ok);
        assert_eq!(result.min_score, Some(0.6));
    }

    #[tokio::test]
    async fn test_request_shape() {
        let api = always_answering_four();
        let evaluator = AccuracyEvaluator::new(Arc::new(api.clone()));
        let samples = vec![AccuracySample::new("2+2?", &["3", "4"], "4")];

        evaluator
            .evaluate("http://mock/v1", "served", &samples, &AccuracyConfig::default())
            .await
            .unwrap();

        let body = &api.chat_requests().await[0];
        assert_eq!(body["model"], "served");
        assert_eq!(body["temperature"], 0);
        assert_eq!(body["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(
            body["messages"][1]["content"],
            "Question: 2+2?\nChoices: 3, 4\nAnswer with the choice only."
        );
    }

    #[tokio::test]
    async fn test_malformed_response_counts_incorrect() {
        let api = MockCompletionApi::builder()
            .chat_default(MockReply::Json(json!({"choices": []})))
            .build();
        let evaluator = AccuracyEvaluator::new(Arc::new(api));

        let result = evaluator
            .evaluate("http://mock/v1", "m", &builtin_samples(), &AccuracyConfig::default())
            .await
            .unwrap();
        assert_eq!(result.correct, 0);
        assert_eq!(result.malformed, 2);
        assert!(result.ok);
    }

    #[tokio::test]
    async fn test_http_error_propagates() {
        let api = MockCompletionApi::builder()
            .chat_default(MockReply::HttpError(500, "down".to_string()))
            .build();
        let evaluator = AccuracyEvaluator::new(Arc::new(api));
        let result = evaluator
            .evaluate("http://mock/v1", "m", &builtin_samples(), &AccuracyConfig::default())
            .await;
        assert!(matches!(result, Err(Error::HttpStatus { status: 500, .. })));
    }

    #[test]
    fn test_empty_sample_list_scores_zero() {
        let result = AccuracyResult::new("gpqa", 0, 0, 0, None);
        assert_eq!(result.score, 0.0);
        assert!(result.ok);
    }

    #[test]
    fn test_normalization_and_aliases() {
        let sample = AccuracySample::new("Capital of France?", &["Paris", "Rome"], "Paris")
            .with_aliases(&["paris, france"]);

        let strict = AccuracyConfig::default();
        assert!(is_match("  Paris\n", &sample, &strict));
        assert!(!is_match("PARIS", &sample, &strict));

        let relaxed = AccuracyConfig {
            case_insensitive: true,
            ..AccuracyConfig::default()
        };
        assert!(is_match("PARIS", &sample, &relaxed));
        assert!(is_match("Paris, France", &sample, &relaxed));

        let no_strip = AccuracyConfig {
            strip: false,
            ..AccuracyConfig::default()
        };
        assert!(!is_match(" Paris", &sample, &no_strip));
    }

    #[test]
    fn test_builtin_samples_when_unconfigured() {
        let samples = load_samples(&AccuracyConfig::default()).unwrap();
        assert_eq!(samples, builtin_samples());
    }

    #[test]
    fn test_load_jsonl_dataset_with_answer_idx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpqa.jsonl");
        std::fs::write(
            &path,
            "{\"question\": \"q1\", \"choices\": [\"a\", \"b\"], \"answer_idx\": 1}\n\n\
             {\"question\": \"q2\", \"choices\": [\"x\"], \"answer\": \"x\", \"answer_aliases\": [\"X.\"]}\n",
        )
        .unwrap();

        let cfg = AccuracyConfig {
            dataset_file: Some(path),
            ..AccuracyConfig::default()
        };
        let samples = load_samples(&cfg).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].answer, "b");
        assert_eq!(samples[1].aliases, vec!["X."]);
    }

    #[test]
    fn test_load_json_samples_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.json");
        std::fs::write(
            &path,
            r#"{"samples": [{"question": "q", "choices": ["1"], "answer": "1"}]}"#,
        )
        .unwrap();

        let cfg = AccuracyConfig {
            samples_file: Some(path),
            ..AccuracyConfig::default()
        };
        assert_eq!(load_samples(&cfg).unwrap()[0].question, "q");
    }

    #[test]
    fn test_answer_idx_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"[{"question": "q", "choices": ["a"], "answer_idx": 3}]"#).unwrap();

        let err = load_dataset(&path, None).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
