use chrono::{DateTime, Utc};
use serde::{ser::SerializeStruct, Serialize, Serializer};
use serde_json::Value;

use crate::types::{ChatMessage, Metadata, MessageRole, Response};

pub const SCENARIO_NAME_KEY: &str = "scenario_name";
pub const MODEL_NAME_KEY: &str = "model_name";

/// Append-only record of one conversation run.
///
/// `messages` and `responses` advance in lockstep: every response appended
/// through [`Transcript::add_response`] also appends exactly one assistant
/// message with the same content.
#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    responses: Vec<Response>,
    metadata: Metadata,
    started_at: DateTime<Utc>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            responses: Vec::new(),
            metadata: Metadata::new(),
            started_at: Utc::now(),
        }
    }

    fn push_message(&mut self, role: MessageRole, content: impl Into<String>) {
        self.messages.push(ChatMessage::new(role, content));
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push_message(MessageRole::User, content);
    }

    pub fn push_system(&mut self, content: impl Into<String>) {
        self.push_message(MessageRole::System, content);
    }

    /// The only way to add an assistant message: it always comes with its
    /// response.
    pub fn add_response(&mut self, response: Response) {
        self.push_message(MessageRole::Assistant, response.content.clone());
        self.responses.push(response);
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    pub fn last_response(&self) -> Option<&Response> {
        self.responses.last()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn model_name(&self) -> Option<&str> {
        self.metadata.get(MODEL_NAME_KEY).and_then(Value::as_str)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Number of model responses, i.e. completed user turns.
    pub fn num_turns(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Serialize for Transcript {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Transcript", 5)?;
        state.serialize_field("messages", &self.messages)?;
        state.serialize_field("responses", &self.responses)?;
        state.serialize_field("metadata", &self.metadata)?;
        state.serialize_field("started_at", &self.started_at)?;
        state.serialize_field("num_turns", &self.num_turns())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_appends_matching_assistant_message() {
        let mut transcript = Transcript::new();
        transcript.push_system("You are a vending machine.");
        transcript.push_user("Hi");
        transcript.add_response(Response::new("Hello, pick an item.", "mock-model"));

        assert_eq!(transcript.messages().len(), 3);
        assert_eq!(transcript.responses().len(), 1);
        let last = transcript.messages().last().unwrap();
        assert_eq!(last.role, MessageRole::Assistant);
        assert_eq!(last.content, "Hello, pick an item.");
        assert_eq!(transcript.last_response().unwrap().content, last.content);
    }

    #[test]
    fn assistant_messages_only_come_from_responses() {
        let mut transcript = Transcript::new();
        transcript.push_system("You are a vending machine.");
        for turn in 0..3 {
            transcript.push_user(format!("turn {turn}"));
            transcript.push_system("reminder");
            transcript.add_response(Response::new(format!("reply {turn}"), "mock-model"));
        }

        let assistant: Vec<&str> = transcript
            .messages()
            .iter()
            .filter(|message| message.role == MessageRole::Assistant)
            .map(|message| message.content.as_str())
            .collect();
        let replies: Vec<&str> = transcript
            .responses()
            .iter()
            .map(|response| response.content.as_str())
            .collect();
        assert_eq!(assistant, replies);
        assert_eq!(transcript.num_turns(), 3);
    }

    #[test]
    fn serializes_snapshot_shape() {
        let mut transcript = Transcript::new();
        transcript.set_metadata(SCENARIO_NAME_KEY, json!("basic_vending_machine"));
        transcript.push_user("What's the price?");
        transcript.add_response(
            Response::new("The price is $5.00", "mock-model").with_raw(json!({"secret": true})),
        );

        let value = serde_json::to_value(&transcript).unwrap();
        assert_eq!(value["num_turns"], json!(1));
        assert_eq!(value["messages"][1]["role"], json!("assistant"));
        assert_eq!(value["metadata"][SCENARIO_NAME_KEY], json!("basic_vending_machine"));
        assert!(value["started_at"].is_string());
        assert!(value["responses"][0].get("raw").is_none());
    }

    #[test]
    fn model_name_reads_metadata() {
        let mut transcript = Transcript::new();
        assert_eq!(transcript.model_name(), None);
        transcript.set_metadata(MODEL_NAME_KEY, json!("gpt-4"));
        assert_eq!(transcript.model_name(), Some("gpt-4"));
    }
}
