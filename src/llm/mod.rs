//! LLM gateway: provider trait and the OpenAI-compatible implementation.

mod openai_compatible;
mod provider;

pub use openai_compatible::OpenAiCompatibleProvider;
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};
