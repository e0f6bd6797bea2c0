use async_trait::async_trait;

use crate::types::{ChatMessage, GenerationOptions, ModelInfo, Response, TextStream};
use crate::AdapterError;

pub mod openai;
pub mod scripted;

/// Uniform capability over model backends. The conversation runner only
/// ever talks to this trait.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<Response, AdapterError>;

    /// Finite, single-pass stream whose fragments concatenate to the content
    /// `generate` would return for the same call.
    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TextStream, AdapterError>;

    fn model_name(&self) -> &str;

    fn model_info(&self) -> ModelInfo {
        ModelInfo::new(self.model_name())
    }

    fn validate_messages(&self, messages: &[ChatMessage]) -> Result<(), AdapterError> {
        validate_messages(messages)
    }
}

/// Roles and content presence are guaranteed by `ChatMessage`; the only
/// malformed input left to reject is an empty list.
pub fn validate_messages(messages: &[ChatMessage]) -> Result<(), AdapterError> {
    if messages.is_empty() {
        return Err(AdapterError::InvalidInput("message list is empty".to_string()));
    }
    Ok(())
}
