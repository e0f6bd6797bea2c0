use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::stream;
use serde_json::json;

use crate::{
    providers::ModelAdapter,
    types::{ChatMessage, GenerationOptions, MessageRole, ModelInfo, Response, TextStream},
    AdapterError,
};

pub const DEFAULT_MODEL_NAME: &str = "mock-model";

/// Replays predefined replies in order, then falls back to echoing the last
/// user message. Used for tests and offline runs.
pub struct ScriptedProvider {
    model_name: String,
    responses: Vec<String>,
    current: AtomicUsize,
    call_count: AtomicUsize,
    failure: Option<(usize, String)>,
}

impl ScriptedProvider {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            responses: Vec::new(),
            current: AtomicUsize::new(0),
            call_count: AtomicUsize::new(0),
            failure: None,
        }
    }

    pub fn with_responses<I, S>(mut self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responses.extend(responses.into_iter().map(Into::into));
        self
    }

    /// Makes the `call`-th generation (1-based) fail with a provider error.
    pub fn fail_on_call(mut self, call: usize, message: impl Into<String>) -> Self {
        self.failure = Some((call, message.into()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.current.store(0, Ordering::SeqCst);
        self.call_count.store(0, Ordering::SeqCst);
    }

    fn next_response(&self) -> Option<String> {
        let len = self.responses.len();
        self.current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |index| {
                (index < len).then_some(index + 1)
            })
            .ok()
            .map(|index| self.responses[index].clone())
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_NAME)
    }
}

fn echo(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|message| message.role == MessageRole::User)
        .map(|message| format!("Mock response to: {}", message.content))
        .unwrap_or_else(|| "Mock response with no user input".to_string())
}

#[async_trait]
impl ModelAdapter for ScriptedProvider {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<Response, AdapterError> {
        self.validate_messages(messages)?;

        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((failing_call, message)) = &self.failure {
            if *failing_call == call {
                return Err(AdapterError::Provider(message.clone()));
            }
        }

        let content = self.next_response().unwrap_or_else(|| echo(messages));

        Ok(Response::new(content, &self.model_name)
            .with_metadata("call_count", json!(call))
            .with_metadata("temperature", json!(options.temperature))
            .with_metadata("max_tokens", json!(options.max_tokens)))
    }

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TextStream, AdapterError> {
        let response = self.generate(messages, options).await?;
        let fragments: Vec<Result<String, AdapterError>> = response
            .content
            .split_inclusive(' ')
            .map(|fragment| Ok(fragment.to_string()))
            .collect();

        Ok(Box::pin(stream::iter(fragments)))
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo::new(&self.model_name)
            .with_config("adapter", json!("scripted"))
            .with_config("scripted_responses", json!(self.responses.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn user(content: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::user(content)]
    }

    #[tokio::test]
    async fn replays_script_then_echoes() {
        let provider = ScriptedProvider::default().with_responses(["first", "second"]);
        let options = GenerationOptions::default();

        let a = provider.generate(&user("one"), &options).await.unwrap();
        let b = provider.generate(&user("two"), &options).await.unwrap();
        let c = provider.generate(&user("three"), &options).await.unwrap();

        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
        assert_eq!(c.content, "Mock response to: three");
        assert_eq!(c.metadata.get("call_count"), Some(&json!(3)));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn echo_without_user_message() {
        let provider = ScriptedProvider::default();
        let response = provider
            .generate(&[ChatMessage::system("be a vending machine")], &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(response.content, "Mock response with no user input");
        assert_eq!(response.model, DEFAULT_MODEL_NAME);
    }

    #[tokio::test]
    async fn rejects_empty_message_list() {
        let provider = ScriptedProvider::default();
        let err = provider
            .generate(&[], &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidInput(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn reset_rewinds_script() {
        let provider = ScriptedProvider::default().with_responses(["only"]);
        let options = GenerationOptions::default();
        provider.generate(&user("a"), &options).await.unwrap();
        provider.reset();

        let again = provider.generate(&user("b"), &options).await.unwrap();
        assert_eq!(again.content, "only");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn injected_failure_hits_requested_call() {
        let provider = ScriptedProvider::default()
            .with_responses(["ok"])
            .fail_on_call(2, "upstream unavailable");
        let options = GenerationOptions::default();

        assert!(provider.generate(&user("a"), &options).await.is_ok());
        let err = provider.generate(&user("b"), &options).await.unwrap_err();
        assert!(matches!(err, AdapterError::Provider(ref message) if message == "upstream unavailable"));
    }

    #[tokio::test]
    async fn stream_fragments_concatenate_to_content() {
        let provider = ScriptedProvider::default().with_responses(["Your  change is $3.50 "]);
        let stream = provider
            .generate_stream(&user("pay"), &GenerationOptions::default())
            .await
            .unwrap();

        let fragments: Vec<String> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(fragments.len() > 1);
        assert_eq!(fragments.concat(), "Your  change is $3.50 ");
    }
}
