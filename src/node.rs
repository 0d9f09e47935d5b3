use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::client::CadClient;
use crate::config::TextTo3DNodeData;
use crate::error::TextTo3DError;
use crate::prompts::render_template;
use crate::runtime::{ConversationMemory, ModelRuntime, ModelSchema, VariablePool};
use crate::types::{
    ImageDetail, LlmUsage, ModelInvokeEvent, ModelMode, NodeRunResult, PromptMessage,
    PromptTemplate,
};

/// Token budget used when the model does not declare a context size.
const DEFAULT_REST_TOKENS: u32 = 2000;

/// The text the model produced, with its accounting.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ModelCompletion {
    text: String,
    usage: LlmUsage,
    finish_reason: Option<String>,
}

/// A workflow node that turns a free-form query into an English 3D object description with a
/// language model, then asks the text-to-CAD service to generate the file.
pub struct TextTo3DNode {
    id: String,
    data: TextTo3DNodeData,
    runtime: Arc<dyn ModelRuntime>,
    memory: Option<Arc<dyn ConversationMemory>>,
    client: CadClient,
}

impl TextTo3DNode {
    /// Creates the node and its text-to-CAD client from `data.generator`.
    ///
    /// # Errors
    ///
    /// Fails like [`CadClient::new`] when the generator settings are unusable.
    pub fn new(
        id: impl Into<String>,
        data: TextTo3DNodeData,
        runtime: Arc<dyn ModelRuntime>,
    ) -> Result<Self, TextTo3DError> {
        let client = CadClient::new(&data.generator)?;
        Ok(Self {
            id: id.into(),
            data,
            runtime,
            memory: None,
            client,
        })
    }

    /// Attaches the conversation memory whose history is fed into the prompt.
    pub fn with_memory(mut self, memory: Arc<dyn ConversationMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Runs the node once and packages the outcome.
    ///
    /// Never fails: configuration, model and 3D service errors all produce a failed
    /// [`NodeRunResult`] carrying the error message and the usage recorded before the failure.
    pub async fn run(&self, pool: &VariablePool) -> NodeRunResult {
        let started = Instant::now();
        let mut inputs = Map::new();
        let mut usage = LlmUsage::empty();

        match self.execute(pool, &mut inputs, &mut usage).await {
            Ok((process_data, outputs)) => {
                info!(node_id = %self.id, total_tokens = usage.total_tokens, "Text-to-3D node succeeded");
                NodeRunResult::succeeded(
                    inputs,
                    process_data,
                    outputs,
                    usage,
                    started.elapsed().as_secs_f64(),
                )
            }
            Err(e) => {
                warn!(node_id = %self.id, error = %e, "Text-to-3D node failed");
                NodeRunResult::failed(inputs, e.to_string(), usage, started.elapsed().as_secs_f64())
            }
        }
    }

    async fn execute(
        &self,
        pool: &VariablePool,
        inputs: &mut Map<String, Value>,
        usage: &mut LlmUsage,
    ) -> Result<(Map<String, Value>, Map<String, Value>), TextTo3DError> {
        self.data.validate()?;

        let query = self.data.resolve_query(pool)?;
        inputs.insert("query".to_string(), Value::String(query.clone()));
        let output_format = self.data.resolve_output_format()?;

        let mode = self.data.model.mode()?;
        let schema = self.runtime.model_schema(&self.data.model).await?;

        let files = match self.data.vision.selector() {
            Some(selector) => pool.get_files(selector),
            None => Vec::new(),
        };

        let rest_tokens = self.calculate_rest_tokens(mode, &schema).await?;
        let histories = self.history_text(rest_tokens).await?;
        debug!(node_id = %self.id, %mode, rest_tokens, files = files.len(), "Prompt inputs resolved");

        let template = render_template(mode, &histories, &query);
        let prompt_messages =
            build_prompt_messages(template, &query, files, self.data.vision.detail());

        let completion = self.invoke_llm(&prompt_messages).await?;
        *usage = completion.usage.clone();
        info!(
            node_id = %self.id,
            total_tokens = completion.usage.total_tokens,
            finish_reason = completion.finish_reason.as_deref().unwrap_or("unknown"),
            "Model invocation completed"
        );

        let prompt = completion.text.trim();
        let generator_request = self.client.redacted_url(prompt, &output_format)?;
        let response = self.client.text_to_cad(prompt, &output_format).await?;

        let mut process_data = Map::new();
        process_data.insert("model_mode".to_string(), json!(mode));
        process_data.insert(
            "prompts".to_string(),
            prompts_for_saving(mode, &prompt_messages),
        );
        process_data.insert("usage".to_string(), serde_json::to_value(&completion.usage)?);
        process_data.insert("finish_reason".to_string(), json!(completion.finish_reason));
        process_data.insert(
            "generator_request".to_string(),
            Value::String(generator_request.to_string()),
        );

        let mut outputs = Map::new();
        outputs.insert("text".to_string(), Value::String(response));
        outputs.insert("output_format".to_string(), Value::String(output_format));

        Ok((process_data, outputs))
    }

    /// Computes how many tokens remain for conversation history.
    ///
    /// The template is rendered with an empty query and no history, and its token cost plus the
    /// configured maximum output tokens is subtracted from the model's context size. Without a
    /// declared (non-zero) context size the flat default of 2000 is returned.
    pub async fn calculate_rest_tokens(
        &self,
        mode: ModelMode,
        schema: &ModelSchema,
    ) -> Result<u32, TextTo3DError> {
        let Some(context_size) = schema.context_size.filter(|size| *size > 0) else {
            return Ok(DEFAULT_REST_TOKENS);
        };

        let template = render_template(mode, "", "");
        let prompt_messages = build_prompt_messages(template, "", Vec::new(), None);
        let prompt_tokens = self
            .runtime
            .count_tokens(&self.data.model, &prompt_messages)
            .await?;
        let max_tokens = schema.max_output_tokens(&self.data.model.completion_params);

        Ok(context_size
            .saturating_sub(max_tokens)
            .saturating_sub(prompt_tokens))
    }

    async fn history_text(&self, rest_tokens: u32) -> Result<String, TextTo3DError> {
        let (Some(memory), Some(config)) = (&self.memory, &self.data.memory) else {
            return Ok(String::new());
        };
        memory
            .history_prompt_text(rest_tokens, config.message_limit())
            .await
    }

    /// Streams the model output until the completion event, or the end of the stream.
    async fn invoke_llm(
        &self,
        prompt_messages: &[PromptMessage],
    ) -> Result<ModelCompletion, TextTo3DError> {
        let invoked = Instant::now();
        let stop = self.data.model.stop();
        let mut stream = self
            .runtime
            .invoke(&self.data.model, prompt_messages, &stop)
            .await?;

        let mut chunks = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ModelInvokeEvent::Chunk { text } => chunks.push_str(&text),
                ModelInvokeEvent::Completed {
                    text,
                    usage,
                    finish_reason,
                } => {
                    return Ok(ModelCompletion {
                        text,
                        usage,
                        finish_reason,
                    });
                }
            }
        }

        warn!(node_id = %self.id, "Model stream ended without a completion event");
        Ok(ModelCompletion {
            text: chunks,
            usage: LlmUsage {
                latency: invoked.elapsed().as_secs_f64(),
                ..LlmUsage::empty()
            },
            finish_reason: None,
        })
    }
}

/// Turns a rendered template into the messages sent to the model.
///
/// In chat mode the query is appended as a final user message, carrying `files`; nothing is
/// appended when both are empty. In completion mode the template becomes a single user message.
/// `detail` is set on the message carrying the files, and only when there are files.
pub fn build_prompt_messages(
    template: PromptTemplate,
    query: &str,
    files: Vec<Value>,
    detail: Option<ImageDetail>,
) -> Vec<PromptMessage> {
    let detail = detail.filter(|_| !files.is_empty());
    match template {
        PromptTemplate::Chat(mut messages) => {
            if !query.is_empty() || !files.is_empty() {
                messages.push(PromptMessage::user(query).with_files(files).with_detail(detail));
            }
            messages
        }
        PromptTemplate::Completion(text) => {
            vec![PromptMessage::user(text).with_files(files).with_detail(detail)]
        }
    }
}

/// The prompt record stored in the process data: a list of messages in chat mode, a single
/// message in completion mode.
pub fn prompts_for_saving(mode: ModelMode, prompt_messages: &[PromptMessage]) -> Value {
    let saved = |message: &PromptMessage| {
        let mut saved = json!({
            "role": message.role,
            "text": message.text,
            "files": message.files,
        });
        if let Some(detail) = message.detail {
            saved["detail"] = json!(detail);
        }
        saved
    };

    match mode {
        ModelMode::Chat => Value::Array(prompt_messages.iter().map(saved).collect()),
        ModelMode::Completion => prompt_messages.first().map(saved).unwrap_or(Value::Null),
    }
}
