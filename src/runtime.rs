//! Interfaces of the collaborators the node relies on: the model runtime, conversation memory
//! and the engine's variable pool.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ModelConfig;
use crate::error::TextTo3DError;
use crate::types::{ModelInvokeEvent, PromptMessage};

/// The stream of events produced by one model invocation.
pub type InvokeStream =
    Pin<Box<dyn Stream<Item = Result<ModelInvokeEvent, TextTo3DError>> + Send>>;

/// A configurable parameter exposed by a model, e.g. `max_tokens` or `temperature`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ParameterRule {
    pub name: String,
    /// The well-known parameter this rule stands for, when its name is provider specific.
    #[serde(default)]
    pub use_template: Option<String>,
}

/// What the runtime knows about a configured model.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ModelSchema {
    /// Context window size in tokens, if the provider declares one.
    #[serde(default)]
    pub context_size: Option<u32>,
    #[serde(default)]
    pub parameter_rules: Vec<ParameterRule>,
}

impl ModelSchema {
    /// The configured maximum number of output tokens, or `0` when none is set.
    ///
    /// The last rule named `max_tokens` (or templated on it) wins. Its value is looked up in
    /// `params` by rule name first, then by template name.
    pub fn max_output_tokens(&self, params: &Map<String, Value>) -> u32 {
        let positive = |key: &str| {
            params
                .get(key)
                .and_then(Value::as_u64)
                .filter(|value| *value > 0)
        };

        let mut max_tokens = 0;
        for rule in &self.parameter_rules {
            let template = rule.use_template.as_deref();
            if rule.name == "max_tokens" || template == Some("max_tokens") {
                max_tokens = positive(&rule.name)
                    .or_else(|| template.and_then(positive))
                    .unwrap_or(0);
            }
        }
        u32::try_from(max_tokens).unwrap_or(u32::MAX)
    }
}

/// The model-invocation runtime: schema lookup, token counting and streaming inference.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Resolves the configured model (provider, credentials) and returns its schema.
    async fn model_schema(&self, model: &ModelConfig) -> Result<ModelSchema, TextTo3DError>;

    /// Counts the prompt tokens `messages` would consume with this model.
    async fn count_tokens(
        &self,
        model: &ModelConfig,
        messages: &[PromptMessage],
    ) -> Result<u32, TextTo3DError>;

    /// Starts an inference and returns its event stream.
    async fn invoke(
        &self,
        model: &ModelConfig,
        messages: &[PromptMessage],
        stop: &[String],
    ) -> Result<InvokeStream, TextTo3DError>;
}

/// A conversation-memory store able to render prior turns as prompt text.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    /// Returns the history, windowed to `message_limit` messages and trimmed to fit `max_token_limit`.
    async fn history_prompt_text(
        &self,
        max_token_limit: u32,
        message_limit: Option<u32>,
    ) -> Result<String, TextTo3DError>;
}

/// A read-mostly view of the workflow engine's variables.
///
/// Variables are addressed by selectors such as `["sys", "query"]` or `["node_1", "files"]`.
/// The first two segments name the variable; any further segments walk into its JSON value.
#[derive(Debug, Clone, Default)]
pub struct VariablePool {
    variables: HashMap<(String, String), Value>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<S: AsRef<str>>(&mut self, selector: &[S], value: Value) {
        if let [node, name, ..] = selector {
            self.variables
                .insert((node.as_ref().to_string(), name.as_ref().to_string()), value);
        }
    }

    pub fn get<S: AsRef<str>>(&self, selector: &[S]) -> Option<&Value> {
        let [node, name, path @ ..] = selector else {
            return None;
        };
        let key = (node.as_ref().to_string(), name.as_ref().to_string());
        path.iter()
            .try_fold(self.variables.get(&key)?, |value, segment| {
                value.get(segment.as_ref())
            })
    }

    /// The variable rendered as text: strings as-is, other non-null values as JSON.
    pub fn get_text<S: AsRef<str>>(&self, selector: &[S]) -> Option<String> {
        match self.get(selector)? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }

    /// The file references stored under `selector`: a single file object or an array of them.
    pub fn get_files<S: AsRef<str>>(&self, selector: &[S]) -> Vec<Value> {
        match self.get(selector) {
            Some(Value::Array(files)) => files.iter().filter(|file| file.is_object()).cloned().collect(),
            Some(file @ Value::Object(_)) => vec![file.clone()],
            _ => Vec::new(),
        }
    }
}
