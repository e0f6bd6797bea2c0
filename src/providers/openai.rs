use std::{env, time::Duration};

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::AdapterError,
    providers::ModelAdapter,
    types::{ChatMessage, GenerationOptions, Metadata, ModelInfo, Response, TextStream},
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4";

/// Connection settings for an OpenAI-compatible chat endpoint.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub request_timeout: Duration,
}

impl OpenAIConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: None,
            project: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Reads `OPENAI_API_KEY`, plus the optional `OPENAI_BASE_URL`,
    /// `OPENAI_ORGANIZATION`, `OPENAI_PROJECT` and `OPENAI_REQUEST_TIMEOUT_MS`.
    /// Blank variables count as unset.
    pub fn from_env() -> Result<Self, AdapterError> {
        let var = |key: &str| env::var(key).ok().filter(|value| !value.trim().is_empty());

        let api_key = var("OPENAI_API_KEY").ok_or(AdapterError::MissingApiKey("OPENAI_API_KEY"))?;
        let mut config = Self::new(api_key);
        if let Some(base_url) = var("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        config.organization = var("OPENAI_ORGANIZATION");
        config.project = var("OPENAI_PROJECT");
        if let Some(millis) = var("OPENAI_REQUEST_TIMEOUT_MS").and_then(|raw| raw.parse().ok()) {
            config.request_timeout = Duration::from_millis(millis);
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.bearer_auth(&self.api_key);
        let builder = match &self.organization {
            Some(organization) => builder.header("OpenAI-Organization", organization),
            None => builder,
        };
        match &self.project {
            Some(project) => builder.header("OpenAI-Project", project),
            None => builder,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAI {
    client: Client,
    config: OpenAIConfig,
    model: String,
}

impl OpenAI {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, AdapterError> {
        Self::from_config(OpenAIConfig::new(api_key), model)
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, AdapterError> {
        Self::from_config(OpenAIConfig::from_env()?, model)
    }

    pub fn from_config(config: OpenAIConfig, model: impl Into<String>) -> Result<Self, AdapterError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            config,
            model: model.into(),
        })
    }

    fn chat_request(&self) -> RequestBuilder {
        self.config
            .authorize(self.client.post(self.config.chat_completions_url()))
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a GenerationOptions,
        stream: bool,
    ) -> OpenAIRequestBody<'a> {
        OpenAIRequestBody {
            model: &self.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stop: if options.stop.is_empty() {
                None
            } else {
                Some(&options.stop)
            },
            stream: stream.then_some(true),
            extra: &options.extra,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, AdapterError> {
        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await?;
            if let Ok(error) = serde_json::from_str::<OpenAIErrorEnvelope>(&text) {
                return Err(AdapterError::Provider(error.error.message));
            }

            return Err(AdapterError::Provider(format!("unexpected status {status}: {text}")));
        }

        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct OpenAIRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(flatten)]
    extra: &'a Metadata,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChatCompletionChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorEnvelope {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

fn into_response(raw: Value, fallback_model: &str) -> Result<Response, AdapterError> {
    let parsed: ChatCompletionResponse = serde_json::from_value(raw.clone())?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or(AdapterError::InvalidResponse("response did not contain any choices"))?;

    let model = parsed.model.unwrap_or_else(|| fallback_model.to_string());
    let content = choice.message.content.unwrap_or_default();

    Ok(Response::new(content, model)
        .with_metadata("finish_reason", json!(choice.finish_reason))
        .with_metadata("usage", parsed.usage.unwrap_or(Value::Null))
        .with_raw(raw))
}

#[async_trait]
impl ModelAdapter for OpenAI {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<Response, AdapterError> {
        self.validate_messages(messages)?;

        let body = self.request_body(messages, options, false);
        let builder = self.chat_request().json(&body);

        let raw: Value = self.send(builder).await?.json().await?;
        into_response(raw, &self.model)
    }

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TextStream, AdapterError> {
        self.validate_messages(messages)?;

        let body = self.request_body(messages, options, true);
        let builder = self
            .chat_request()
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .json(&body);

        let response = self.send(builder).await?;

        let stream = try_stream! {
            let mut events = SseBuffer::default();
            let mut body_stream = response.bytes_stream();
            let mut done = false;

            while !done {
                match body_stream.next().await {
                    Some(chunk) => events.push(&chunk?),
                    None => break,
                }

                while let Some(event) = events.next_event() {
                    match parse_event(&event)? {
                        Some(SseFrame::Deltas(deltas)) => {
                            for text in deltas {
                                yield text;
                            }
                        }
                        Some(SseFrame::Done) => {
                            done = true;
                            break;
                        }
                        None => {}
                    }
                }
            }

            // body closed without a trailing blank line
            if !done {
                if let Some(event) = events.take_remainder() {
                    if let Some(SseFrame::Deltas(deltas)) = parse_event(&event)? {
                        for text in deltas {
                            yield text;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo::new(&self.model)
            .with_config("adapter", json!("openai"))
            .with_config("base_url", json!(self.config.base_url))
            .with_config("organization", json!(self.config.organization))
            .with_config("project", json!(self.config.project))
            .with_config(
                "request_timeout_ms",
                json!(self.config.request_timeout.as_millis() as u64),
            )
    }
}

/// Splits a `text/event-stream` body into events as bytes arrive.
#[derive(Debug, Default)]
struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pops the next event terminated by a blank line (`\n\n` or `\r\n\r\n`).
    fn next_event(&mut self) -> Option<Vec<u8>> {
        let lf = find(&self.pending, b"\n\n").map(|at| (at, 2));
        let crlf = find(&self.pending, b"\r\n\r\n").map(|at| (at, 4));
        let (at, len) = match (lf, crlf) {
            (Some(lf), Some(crlf)) => lf.min(crlf),
            (found, None) | (None, found) => found?,
        };

        let event = self.pending[..at].to_vec();
        self.pending.drain(..at + len);
        Some(event)
    }

    fn take_remainder(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.pending);
        if rest.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(rest)
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[derive(Debug, PartialEq)]
enum SseFrame {
    Deltas(Vec<String>),
    Done,
}

/// Joins the `data:` lines of one event. `None` for comments and keep-alives.
fn parse_event(event: &[u8]) -> Result<Option<SseFrame>, AdapterError> {
    let text = std::str::from_utf8(event)
        .map_err(|_| AdapterError::InvalidResponse("stream event contained invalid utf-8"))?;

    let payload = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect::<Vec<_>>()
        .join("\n");
    let payload = payload.trim();

    if payload.is_empty() {
        return Ok(None);
    }
    if payload == "[DONE]" {
        return Ok(Some(SseFrame::Done));
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(payload)?;
    let deltas = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.and_then(|delta| delta.content))
        .filter(|text| !text.is_empty())
        .collect();
    Ok(Some(SseFrame::Deltas(deltas)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_events_split_on_blank_lines() {
        let mut events = SseBuffer::default();
        events.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n: ping\r\n\r\ndata: [DONE]\n\nrest");

        let first = events.next_event().unwrap();
        assert_eq!(
            parse_event(&first).unwrap(),
            Some(SseFrame::Deltas(vec!["Hi".to_string()]))
        );

        let keep_alive = events.next_event().unwrap();
        assert_eq!(parse_event(&keep_alive).unwrap(), None);

        let last = events.next_event().unwrap();
        assert_eq!(parse_event(&last).unwrap(), Some(SseFrame::Done));

        assert!(events.next_event().is_none());
        assert_eq!(events.take_remainder(), Some(b"rest".to_vec()));
    }

    #[test]
    fn unterminated_final_event_is_kept() {
        let mut events = SseBuffer::default();
        events.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n");
        events.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n");

        let first = events.next_event().unwrap();
        assert_eq!(
            parse_event(&first).unwrap(),
            Some(SseFrame::Deltas(vec!["a".to_string()]))
        );
        assert!(events.next_event().is_none());

        let tail = events.take_remainder().unwrap();
        assert_eq!(
            parse_event(&tail).unwrap(),
            Some(SseFrame::Deltas(vec!["b".to_string()]))
        );
        assert!(events.take_remainder().is_none());
    }

    #[test]
    fn chat_url_ignores_trailing_slash() {
        let config = OpenAIConfig::new("sk-test").with_base_url("http://localhost:8080/v1/");
        assert_eq!(config.chat_completions_url(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn completion_payload_maps_to_response() {
        let raw = json!({
            "model": "gpt-4-0613",
            "choices": [{
                "message": {"role": "assistant", "content": "The price is $5.00"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 6, "total_tokens": 18}
        });

        let response = into_response(raw.clone(), DEFAULT_MODEL).unwrap();
        assert_eq!(response.content, "The price is $5.00");
        assert_eq!(response.model, "gpt-4-0613");
        assert_eq!(response.metadata.get("finish_reason"), Some(&json!("stop")));
        assert_eq!(response.metadata["usage"]["total_tokens"], json!(18));
        assert_eq!(response.raw, Some(raw));
    }

    #[test]
    fn empty_choices_is_invalid_response() {
        let err = into_response(json!({"choices": []}), DEFAULT_MODEL).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidResponse(_)));
    }

    #[test]
    fn request_body_flattens_extra_options() {
        let provider = OpenAI::new("sk-test", "gpt-4o-mini").unwrap();
        let messages = vec![ChatMessage::system("vend"), ChatMessage::user("hi")];
        let options = GenerationOptions::new(0.2)
            .with_max_tokens(64)
            .with_extra("top_p", json!(0.9));

        let body = serde_json::to_value(provider.request_body(&messages, &options, false)).unwrap();
        assert_eq!(body["model"], json!("gpt-4o-mini"));
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["max_tokens"], json!(64));
        assert_eq!(body["top_p"], json!(0.9));
        assert!(body.get("stop").is_none());
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn model_info_omits_api_key() {
        let provider = OpenAI::new("sk-secret", DEFAULT_MODEL).unwrap();
        let info = serde_json::to_string(&provider.model_info()).unwrap();
        assert!(info.contains("api.openai.com"));
        assert!(!info.contains("sk-secret"));
    }
}
