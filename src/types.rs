use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TextTo3DError;

/// Whether the target model expects a multi-message chat exchange or a single completion string.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ModelMode {
    Chat,
    Completion,
}

impl ModelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Completion => "completion",
        }
    }
}

impl fmt::Display for ModelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelMode {
    type Err = TextTo3DError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "completion" => Ok(Self::Completion),
            other => Err(TextTo3DError::InvalidModelMode(other.to_string())),
        }
    }
}

/// How closely a vision model should look at attached images.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    #[default]
    High,
}

/// The author of a prompt message.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PromptMessageRole {
    System,
    User,
    Assistant,
}

/// A role-tagged text fragment sent to the model.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PromptMessage {
    pub role: PromptMessageRole,
    pub text: String,
    /// File references (images and the like) attached to this message, as found in the variable pool.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Value>,
    /// The image detail the model should apply to `files`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ImageDetail>,
}

impl PromptMessage {
    pub fn new(role: PromptMessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            files: Vec::new(),
            detail: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(PromptMessageRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(PromptMessageRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(PromptMessageRole::Assistant, text)
    }

    pub fn with_files(mut self, files: Vec<Value>) -> Self {
        self.files = files;
        self
    }

    pub fn with_detail(mut self, detail: Option<ImageDetail>) -> Self {
        self.detail = detail;
        self
    }
}

/// A rendered prompt template, shaped by the model mode.
#[derive(Debug, PartialEq, Clone)]
pub enum PromptTemplate {
    /// A few-shot exchange: system instruction, one user example, one assistant example.
    Chat(Vec<PromptMessage>),
    /// A single template string with history and input already substituted.
    Completion(String),
}

/// Token counts and price attributed to one model invocation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub total_price: f64,
    pub currency: String,
    /// Wall-clock seconds spent in the model call.
    pub latency: f64,
}

impl LlmUsage {
    /// The zero-valued usage reported when nothing was consumed.
    pub fn empty() -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            total_price: 0.0,
            currency: "USD".to_string(),
            latency: 0.0,
        }
    }
}

impl Default for LlmUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// An event yielded by a streaming model invocation.
#[derive(Debug, PartialEq, Clone)]
pub enum ModelInvokeEvent {
    /// A partial piece of generated text.
    Chunk { text: String },
    /// The invocation finished; `text` is the full generated text.
    Completed {
        text: String,
        usage: LlmUsage,
        finish_reason: Option<String>,
    },
}

/// The outcome of a node execution.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum NodeRunStatus {
    Succeeded,
    Failed,
}

/// Keys of the aggregated usage metadata attached to a [`NodeRunResult`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunMetadataKey {
    TotalTokens,
    TotalPrice,
    Currency,
}

/// The record a node hands back to the workflow engine after one execution.
///
/// A succeeded result carries outputs and no error; a failed result carries an error and
/// empty outputs. Usage is always present and zero-valued when nothing was consumed.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NodeRunResult {
    status: NodeRunStatus,
    inputs: Map<String, Value>,
    process_data: Map<String, Value>,
    outputs: Map<String, Value>,
    metadata: BTreeMap<NodeRunMetadataKey, Value>,
    llm_usage: LlmUsage,
    error: Option<String>,
    elapsed_time: f64,
    finished_at: DateTime<Utc>,
}

impl NodeRunResult {
    pub fn succeeded(
        inputs: Map<String, Value>,
        process_data: Map<String, Value>,
        outputs: Map<String, Value>,
        usage: LlmUsage,
        elapsed_time: f64,
    ) -> Self {
        Self {
            status: NodeRunStatus::Succeeded,
            inputs,
            process_data,
            outputs,
            metadata: usage_metadata(&usage),
            llm_usage: usage,
            error: None,
            elapsed_time,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        inputs: Map<String, Value>,
        error: impl Into<String>,
        usage: LlmUsage,
        elapsed_time: f64,
    ) -> Self {
        Self {
            status: NodeRunStatus::Failed,
            inputs,
            process_data: Map::new(),
            outputs: Map::new(),
            metadata: usage_metadata(&usage),
            llm_usage: usage,
            error: Some(error.into()),
            elapsed_time,
            finished_at: Utc::now(),
        }
    }

    pub fn status(&self) -> NodeRunStatus {
        self.status
    }

    pub fn inputs(&self) -> &Map<String, Value> {
        &self.inputs
    }

    pub fn process_data(&self) -> &Map<String, Value> {
        &self.process_data
    }

    pub fn outputs(&self) -> &Map<String, Value> {
        &self.outputs
    }

    pub fn metadata(&self) -> &BTreeMap<NodeRunMetadataKey, Value> {
        &self.metadata
    }

    pub fn llm_usage(&self) -> &LlmUsage {
        &self.llm_usage
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Seconds between the start of the run and the creation of this record.
    pub fn elapsed_time(&self) -> f64 {
        self.elapsed_time
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }
}

fn usage_metadata(usage: &LlmUsage) -> BTreeMap<NodeRunMetadataKey, Value> {
    BTreeMap::from([
        (NodeRunMetadataKey::TotalTokens, Value::from(usage.total_tokens)),
        (NodeRunMetadataKey::TotalPrice, Value::from(usage.total_price)),
        (NodeRunMetadataKey::Currency, Value::from(usage.currency.clone())),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_mode_parsing() {
        assert_eq!("chat".parse::<ModelMode>().unwrap(), ModelMode::Chat);
        assert_eq!("completion".parse::<ModelMode>().unwrap(), ModelMode::Completion);

        let err = "agent".parse::<ModelMode>().unwrap_err();
        assert!(matches!(err, TextTo3DError::InvalidModelMode(mode) if mode == "agent"));
    }

    #[test]
    fn test_failed_result_has_empty_outputs_and_zero_usage() {
        let result = NodeRunResult::failed(Map::new(), "boom", LlmUsage::empty(), 0.1);

        assert_eq!(result.status(), NodeRunStatus::Failed);
        assert!(result.outputs().is_empty());
        assert_eq!(result.error(), Some("boom"));
        assert_eq!(result.metadata()[&NodeRunMetadataKey::TotalTokens], json!(0));
        assert_eq!(result.metadata()[&NodeRunMetadataKey::Currency], json!("USD"));
    }

    #[test]
    fn test_result_serializes_metadata_keys() {
        let usage = LlmUsage {
            total_tokens: 42,
            ..LlmUsage::empty()
        };
        let result = NodeRunResult::succeeded(Map::new(), Map::new(), Map::new(), usage, 0.0);
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["status"], json!("succeeded"));
        assert_eq!(value["metadata"]["total_tokens"], json!(42));
        assert!(value["error"].is_null());
    }
}
