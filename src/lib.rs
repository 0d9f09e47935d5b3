//! A text-to-3D workflow node.
//!
//! The node takes a user query in any language, runs it through a language model that rewrites
//! it as an English description of a 3D object, and forwards that description to a text-to-CAD
//! service. The service response, which references the generated file, becomes the node output.
//!
//! ## Features
//! - Chat and completion prompt templates with conversation history.
//! - Token budgeting of the history against the model's context window.
//! - A text-to-CAD client with URL-encoded parameters, timeouts and retry with backoff.
//! - One failure boundary: every error becomes a failed [`NodeRunResult`].
//!
//! The model runtime and the conversation memory are collaborators supplied by the host
//! through the [`ModelRuntime`] and [`ConversationMemory`] traits.

pub mod client;
pub mod config;
pub mod error;
pub mod node;
pub mod prompts;
pub mod runtime;
pub mod types;
pub mod variables;

pub use client::CadClient;
pub use config::{
    default_config, GeneratorConfig, MemoryConfig, MemoryWindow, ModelConfig, RetryConfig,
    TextTo3DNodeData, Topic, VisionConfig, VisionSetting, NODE_TYPE,
};
pub use error::TextTo3DError;
pub use node::{build_prompt_messages, prompts_for_saving, TextTo3DNode};
pub use prompts::render_template;
pub use runtime::{
    ConversationMemory, InvokeStream, ModelRuntime, ModelSchema, ParameterRule, VariablePool,
};
pub use types::{
    ImageDetail, LlmUsage, ModelInvokeEvent, ModelMode, NodeRunMetadataKey, NodeRunResult,
    NodeRunStatus, PromptMessage, PromptMessageRole, PromptTemplate,
};
pub use variables::{extract_variable_selectors, variable_selector_mapping, VariableSelector};
