//! Typed OpenAI response envelopes
//!
//! Field access goes through methods that return [`Error::MissingField`] instead of
//! falling back to empty strings, so malformed responses are an explicit branch.

use crate::traits::CompletionOutput;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// `/chat/completions` response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

impl ChatCompletion {
    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::invalid_response(format!(
                "expected JSON object, got {value}"
            )));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| Error::invalid_response(format!("malformed chat completion: {e}")))
    }

    /// Assemble a completion from either a JSON body or stream chunks
    pub fn from_output(output: &CompletionOutput) -> Result<Self> {
        match output {
            CompletionOutput::Json(value) => Self::from_value(value),
            CompletionOutput::Stream(chunks) => Self::from_chunks(chunks),
        }
    }

    fn from_chunks(chunks: &[Value]) -> Result<Self> {
        let mut completion = ChatCompletion::default();
        let mut message: Option<ChatMessage> = None;
        let mut finish_reason = None;

        for raw in chunks {
            let chunk: ChatChunk = serde_json::from_value(raw.clone())
                .map_err(|e| Error::invalid_response(format!("malformed stream chunk: {e}")))?;
            completion.id = completion.id.or(chunk.id);
            completion.model = completion.model.or(chunk.model);

            for choice in chunk.choices.into_iter().filter(|c| c.index == 0) {
                let msg = message.get_or_insert_with(ChatMessage::default);
                if let Some(delta) = choice.delta {
                    msg.role = msg.role.take().or(delta.role);
                    if let Some(text) = delta.content {
                        msg.content.get_or_insert_with(String::new).push_str(&text);
                    }
                    if let Some(text) = delta.reasoning_content {
                        msg.reasoning_content
                            .get_or_insert_with(String::new)
                            .push_str(&text);
                    }
                }
                finish_reason = choice.finish_reason.or(finish_reason);
            }
        }

        if let Some(message) = message {
            completion.choices.push(ChatChoice {
                index: 0,
                message: Some(message),
                finish_reason,
            });
        }
        Ok(completion)
    }

    pub fn first_message(&self) -> Result<&ChatMessage> {
        let choice = self
            .choices
            .first()
            .ok_or_else(|| Error::missing_field("choices"))?;
        choice
            .message
            .as_ref()
            .ok_or_else(|| Error::missing_field("choices[0].message"))
    }

    /// Assistant text of the first choice
    pub fn first_content(&self) -> Result<&str> {
        self.first_message()?
            .content
            .as_deref()
            .ok_or_else(|| Error::missing_field("choices[0].message.content"))
    }
}
