#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;
use serde_json::{json, Value};
use text_to_3d_node::{
    ConversationMemory, InvokeStream, LlmUsage, ModelConfig, ModelInvokeEvent, ModelRuntime,
    ModelSchema, ParameterRule, PromptMessage, TextTo3DError, TextTo3DNodeData, VariablePool,
};

pub const API_TOKEN: &str = "api-test-token";
pub const QUERY: &str = "一个红色的立方体";

/// What the fake model does when invoked.
#[derive(Clone)]
pub enum Script {
    Complete { text: String, usage: LlmUsage },
    ChunksOnly(Vec<String>),
    FailMidStream(String),
}

pub struct FakeRuntime {
    pub schema: ModelSchema,
    pub prompt_tokens: u32,
    pub script: Script,
    pub counted: Mutex<Vec<Vec<PromptMessage>>>,
    pub invoked: Mutex<Vec<(Vec<PromptMessage>, Vec<String>)>>,
}

impl FakeRuntime {
    pub fn new(script: Script) -> Self {
        Self {
            schema: ModelSchema {
                context_size: Some(4096),
                parameter_rules: vec![
                    ParameterRule { name: "temperature".to_string(), use_template: None },
                    ParameterRule { name: "max_tokens".to_string(), use_template: None },
                ],
            },
            prompt_tokens: 100,
            script,
            counted: Mutex::new(Vec::new()),
            invoked: Mutex::new(Vec::new()),
        }
    }

    pub fn completing(text: &str) -> Self {
        Self::new(Script::Complete {
            text: text.to_string(),
            usage: usage(20, 10),
        })
    }

    pub fn last_invocation(&self) -> (Vec<PromptMessage>, Vec<String>) {
        self.invoked.lock().unwrap().last().cloned().expect("model was not invoked")
    }

    pub fn invocation_count(&self) -> usize {
        self.invoked.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelRuntime for FakeRuntime {
    async fn model_schema(&self, _model: &ModelConfig) -> Result<ModelSchema, TextTo3DError> {
        Ok(self.schema.clone())
    }

    async fn count_tokens(
        &self,
        _model: &ModelConfig,
        messages: &[PromptMessage],
    ) -> Result<u32, TextTo3DError> {
        self.counted.lock().unwrap().push(messages.to_vec());
        Ok(self.prompt_tokens)
    }

    async fn invoke(
        &self,
        _model: &ModelConfig,
        messages: &[PromptMessage],
        stop: &[String],
    ) -> Result<InvokeStream, TextTo3DError> {
        self.invoked
            .lock()
            .unwrap()
            .push((messages.to_vec(), stop.to_vec()));

        let events: Vec<Result<ModelInvokeEvent, TextTo3DError>> = match &self.script {
            Script::Complete { text, usage } => vec![
                Ok(ModelInvokeEvent::Chunk { text: text.clone() }),
                Ok(ModelInvokeEvent::Completed {
                    text: text.clone(),
                    usage: usage.clone(),
                    finish_reason: Some("stop".to_string()),
                }),
            ],
            Script::ChunksOnly(chunks) => chunks
                .iter()
                .map(|text| Ok(ModelInvokeEvent::Chunk { text: text.clone() }))
                .collect(),
            Script::FailMidStream(message) => vec![
                Ok(ModelInvokeEvent::Chunk { text: "a red".to_string() }),
                Err(TextTo3DError::ModelInvocation(message.clone())),
            ],
        };
        Ok(Box::pin(stream::iter(events)))
    }
}

/// Memory that always returns the same history and records how it was asked.
pub struct FakeMemory {
    pub history: String,
    pub requests: Mutex<Vec<(u32, Option<u32>)>>,
}

impl FakeMemory {
    pub fn new(history: &str) -> Arc<Self> {
        Arc::new(Self {
            history: history.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ConversationMemory for FakeMemory {
    async fn history_prompt_text(
        &self,
        max_token_limit: u32,
        message_limit: Option<u32>,
    ) -> Result<String, TextTo3DError> {
        self.requests
            .lock()
            .unwrap()
            .push((max_token_limit, message_limit));
        Ok(self.history.clone())
    }
}

pub fn usage(prompt_tokens: u32, completion_tokens: u32) -> LlmUsage {
    LlmUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
        total_price: 0.0015,
        currency: "USD".to_string(),
        latency: 0.2,
    }
}

pub fn node_config(base_url: &str, mode: &str) -> Value {
    json!({
        "title": "Text to 3D",
        "query_variable_selector": ["sys", "query"],
        "output_format": "stl",
        "model": {
            "provider": "openai",
            "name": "gpt-4o",
            "mode": mode,
            "completion_params": { "temperature": 0.7, "max_tokens": 512, "stop": ["###"] }
        },
        "memory": { "window": { "enabled": true, "size": 10 } },
        "generator": {
            "base_url": base_url,
            "api_token": API_TOKEN,
            "timeout_secs": 5,
            "retry": {
                "max_retries": 2,
                "initial_backoff_ms": 10,
                "max_backoff_ms": 50,
                "backoff_multiplier": 2.0
            }
        }
    })
}

pub fn node_data(base_url: &str, mode: &str) -> TextTo3DNodeData {
    serde_json::from_value(node_config(base_url, mode)).unwrap()
}

pub fn variable_pool() -> VariablePool {
    let mut pool = VariablePool::new();
    pool.add(&["sys", "query"], json!(QUERY));
    pool
}
