use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use serde_json::json;
use text_to_3d_node::{
    GeneratorConfig, InvokeStream, LlmUsage, ModelConfig, ModelInvokeEvent, ModelRuntime,
    ModelSchema, PromptMessage, TextTo3DError, TextTo3DNode, TextTo3DNodeData, VariablePool,
};

/// Stands in for a real model runtime: answers with a fixed English description.
struct CannedRuntime;

#[async_trait]
impl ModelRuntime for CannedRuntime {
    async fn model_schema(&self, _model: &ModelConfig) -> Result<ModelSchema, TextTo3DError> {
        Ok(ModelSchema {
            context_size: Some(8192),
            parameter_rules: Vec::new(),
        })
    }

    async fn count_tokens(
        &self,
        _model: &ModelConfig,
        messages: &[PromptMessage],
    ) -> Result<u32, TextTo3DError> {
        // Rough estimate: four characters per token.
        Ok(messages.iter().map(|m| m.text.chars().count() as u32 / 4).sum())
    }

    async fn invoke(
        &self,
        _model: &ModelConfig,
        _messages: &[PromptMessage],
        _stop: &[String],
    ) -> Result<InvokeStream, TextTo3DError> {
        Ok(Box::pin(stream::iter(vec![Ok(ModelInvokeEvent::Completed {
            text: "Generate a 2 * 3 LEGO block".to_string(),
            usage: LlmUsage::empty(),
            finish_reason: Some("stop".to_string()),
        })])))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let mut data: TextTo3DNodeData = serde_json::from_value(json!({
        "title": "Text to 3D",
        "query_variable_selector": ["sys", "query"],
        "output_format": "stl",
        "model": { "provider": "canned", "name": "canned", "mode": "chat" }
    }))?;
    data.generator = GeneratorConfig::from_env()?;

    let node = TextTo3DNode::new("text_to_3d", data, Arc::new(CannedRuntime))?;

    let mut pool = VariablePool::new();
    pool.add(&["sys", "query"], json!("生成一个2*3的乐高积木块"));

    let result = node.run(&pool).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
