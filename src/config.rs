//! Node configuration as stored in the workflow graph, plus the settings of the 3D generation service.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::TextTo3DError;
use crate::runtime::VariablePool;
use crate::types::{ImageDetail, ModelMode};

/// The node type identifier used in graph configurations.
pub const NODE_TYPE: &str = "text-to-3d";

pub const DEFAULT_GENERATOR_URL: &str = "http://127.0.0.1:5771/";
pub const BASE_URL_ENV: &str = "TEXT_TO_3D_BASE_URL";
pub const API_TOKEN_ENV: &str = "TEXT_TO_3D_API_TOKEN";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// A named entry of the legacy `classes` list.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Topic {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// The language model the node runs its prompt through.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ModelConfig {
    pub provider: String,
    pub name: String,
    /// `chat` or `completion`. Kept as a string so that unsupported modes surface at run time.
    pub mode: String,
    #[serde(default)]
    pub completion_params: Map<String, Value>,
}

impl ModelConfig {
    pub fn mode(&self) -> Result<ModelMode, TextTo3DError> {
        self.mode.parse()
    }

    /// Stop sequences from `completion_params["stop"]`.
    pub fn stop(&self) -> Vec<String> {
        self.completion_params
            .get("stop")
            .and_then(Value::as_array)
            .map(|stops| {
                stops
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MemoryWindow {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub size: Option<u32>,
}

/// Conversation-memory settings.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MemoryConfig {
    #[serde(default)]
    pub window: Option<MemoryWindow>,
}

impl MemoryConfig {
    /// Maximum number of history messages, when the window is enabled.
    pub fn message_limit(&self) -> Option<u32> {
        self.window
            .as_ref()
            .filter(|window| window.enabled)
            .and_then(|window| window.size)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct VisionSetting {
    #[serde(default)]
    pub variable_selector: Vec<String>,
    #[serde(default)]
    pub detail: ImageDetail,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct VisionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub configs: Option<VisionSetting>,
}

impl VisionConfig {
    /// The selector of the file variable, when vision is enabled and configured.
    pub fn selector(&self) -> Option<&[String]> {
        if !self.enabled {
            return None;
        }
        self.configs
            .as_ref()
            .map(|configs| configs.variable_selector.as_slice())
            .filter(|selector| !selector.is_empty())
    }

    /// The image detail requested for attached files, when vision is enabled.
    pub fn detail(&self) -> Option<ImageDetail> {
        self.selector()?;
        self.configs.as_ref().map(|configs| configs.detail)
    }
}

/// Exponential backoff applied to transient failures of the 3D generation service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms =
            (self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32)) as u64;
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

/// Where and how to reach the text-to-CAD service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeneratorConfig {
    pub base_url: String,
    /// Falls back to the `TEXT_TO_3D_API_TOKEN` environment variable when unset.
    #[serde(default, skip_serializing)]
    pub api_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GENERATOR_URL.to_string(),
            api_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry: RetryConfig::default(),
        }
    }
}

impl GeneratorConfig {
    /// Builds the service settings from `TEXT_TO_3D_BASE_URL` and `TEXT_TO_3D_API_TOKEN`.
    ///
    /// # Errors
    ///
    /// - `TextTo3DError::MissingApiToken` if the token variable is unset or empty.
    pub fn from_env() -> Result<Self, TextTo3DError> {
        let base_url = env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_GENERATOR_URL.to_string());
        let api_token = env::var(API_TOKEN_ENV)
            .ok()
            .filter(|token| !token.is_empty())
            .ok_or(TextTo3DError::MissingApiToken)?;

        Ok(Self {
            base_url,
            api_token: Some(api_token),
            ..Default::default()
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The configuration of one text-to-3D node.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TextTo3DNodeData {
    #[serde(default)]
    pub title: String,
    /// Variable holding the user's query, e.g. `["sys", "query"]`.
    #[serde(default)]
    pub query_variable_selector: Vec<String>,
    /// A fixed query. Takes precedence over the selector and the legacy classes.
    #[serde(default)]
    pub query: Option<String>,
    /// The requested export format, e.g. `stl` or `step`.
    #[serde(default)]
    pub output_format: Option<String>,
    /// Legacy positional fields: `classes[0]` is the query, `classes[1]` the output format.
    #[serde(default)]
    pub classes: Vec<Topic>,
    #[serde(default)]
    pub instruction: String,
    pub model: ModelConfig,
    #[serde(default)]
    pub memory: Option<MemoryConfig>,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

impl TextTo3DNodeData {
    /// Checks that the configuration is complete enough to run.
    pub fn validate(&self) -> Result<(), TextTo3DError> {
        if self.query.is_none() && self.query_variable_selector.is_empty() && self.classes.is_empty() {
            return Err(TextTo3DError::invalid_config(
                "query_variable_selector",
                "a query, a query variable or legacy classes are required",
            ));
        }
        if self.model.provider.is_empty() {
            return Err(TextTo3DError::invalid_config("model.provider", "field required"));
        }
        if self.classes.iter().any(|class| class.name.trim().is_empty()) {
            return Err(TextTo3DError::invalid_config("classes", "class names must not be empty"));
        }
        if self.vision.enabled && self.vision.selector().is_none() {
            return Err(TextTo3DError::invalid_config(
                "vision.configs.variable_selector",
                "required when vision is enabled",
            ));
        }
        if self.generator.base_url.trim().is_empty() {
            return Err(TextTo3DError::invalid_config("generator.base_url", "field required"));
        }
        Ok(())
    }

    /// Resolves the query: the fixed `query` first, then the query variable, then `classes[0]`.
    pub fn resolve_query(&self, pool: &VariablePool) -> Result<String, TextTo3DError> {
        if let Some(query) = self.query.as_deref().filter(|query| !query.trim().is_empty()) {
            return Ok(query.to_string());
        }
        if !self.query_variable_selector.is_empty() {
            if let Some(query) = pool.get_text(&self.query_variable_selector) {
                return Ok(query);
            }
        }
        self.legacy_class(0, "query")
    }

    /// Resolves the export format: the explicit `output_format` first, then `classes[1]`.
    pub fn resolve_output_format(&self) -> Result<String, TextTo3DError> {
        match self.output_format.as_deref().map(str::trim) {
            Some(format) if !format.is_empty() => Ok(format.to_string()),
            _ => self.legacy_class(1, "output_format"),
        }
    }

    fn legacy_class(&self, index: usize, field: &'static str) -> Result<String, TextTo3DError> {
        if self.classes.len() < 2 {
            return Err(TextTo3DError::invalid_config(
                field,
                format!(
                    "not configured, and `classes` needs at least 2 entries (query, output format) but has {}",
                    self.classes.len()
                ),
            ));
        }
        let name = self.classes[index].name.trim();
        if name.is_empty() {
            return Err(TextTo3DError::invalid_config(field, "class name is empty"));
        }
        Ok(name.to_string())
    }
}

/// The default configuration the editor uses for a freshly added node.
pub fn default_config() -> Value {
    json!({ "type": NODE_TYPE, "config": { "instructions": "" } })
}
