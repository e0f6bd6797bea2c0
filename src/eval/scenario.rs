use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{ser::SerializeStruct, Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::{
    error::{ScenarioError, ValidatorError},
    history::Transcript,
    types::{ChatMessage, GenerationOptions, Metadata, DEFAULT_TEMPERATURE},
};

/// Custom check over a finished conversation. `Err` marks the check itself as
/// broken; the evaluator turns it into a failing metric.
pub type ValidatorFn =
    dyn Fn(&Transcript, &Scenario) -> Result<bool, ValidatorError> + Send + Sync;

#[derive(Clone)]
pub struct NamedValidator {
    name: String,
    check: Arc<ValidatorFn>,
}

impl NamedValidator {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Transcript, &Scenario) -> Result<bool, ValidatorError> + Send + Sync + 'static,
    {
        Self::from_shared(name, Arc::new(check))
    }

    pub fn from_shared(name: impl Into<String>, check: Arc<ValidatorFn>) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, transcript: &Transcript, scenario: &Scenario) -> Result<bool, ValidatorError> {
        (self.check)(transcript, scenario)
    }
}

impl fmt::Debug for NamedValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedValidator").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// Sent to the model; produces one response.
    UserInput,
    /// Inert marker inspected only by the evaluator and validators.
    StateCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(rename = "turn_type")]
    pub kind: TurnKind,
    pub content: String,
    #[serde(default)]
    pub expected_patterns: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Turn {
    pub fn new(kind: TurnKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            expected_patterns: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn user_input(content: impl Into<String>) -> Self {
        Self::new(TurnKind::UserInput, content)
    }

    pub fn state_check(description: impl Into<String>) -> Self {
        Self::new(TurnKind::StateCheck, description)
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn has_patterns(&self) -> bool {
        !self.expected_patterns.is_empty()
    }
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ScenarioConfig {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            stop_sequences: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stop_sequences<I, S>(mut self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_sequences.extend(stop.into_iter().map(Into::into));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stop: self.stop_sequences.clone(),
            extra: Metadata::new(),
        }
    }
}

/// Named, ordered script of turns plus the checks used to grade it.
///
/// Turns run in insertion order. Scenarios only grow: there is no way to
/// remove or reorder a turn or validator once added.
#[derive(Debug, Clone)]
pub struct Scenario {
    config: ScenarioConfig,
    turns: Vec<Turn>,
    validators: Vec<NamedValidator>,
    created_at: DateTime<Utc>,
}

impl Scenario {
    pub fn new(config: ScenarioConfig) -> Result<Self, ScenarioError> {
        if config.name.trim().is_empty() {
            return Err(ScenarioError::EmptyName);
        }

        Ok(Self {
            config,
            turns: Vec::new(),
            validators: Vec::new(),
            created_at: Utc::now(),
        })
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn validators(&self) -> &[NamedValidator] {
        &self.validators
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn add_turn(&mut self, turn: Turn) -> &mut Self {
        self.turns.push(turn);
        self
    }

    pub fn add_user_input(&mut self, content: impl Into<String>, expected_patterns: &[&str]) -> &mut Self {
        self.add_turn(Turn::user_input(content).with_patterns(expected_patterns.iter().copied()))
    }

    pub fn add_state_check(
        &mut self,
        description: impl Into<String>,
        expected_patterns: &[&str],
    ) -> &mut Self {
        self.add_turn(Turn::state_check(description).with_patterns(expected_patterns.iter().copied()))
    }

    pub fn add_validator<F>(&mut self, name: impl Into<String>, check: F) -> &mut Self
    where
        F: Fn(&Transcript, &Scenario) -> Result<bool, ValidatorError> + Send + Sync + 'static,
    {
        self.add_named_validator(NamedValidator::new(name, check))
    }

    pub fn add_named_validator(&mut self, validator: NamedValidator) -> &mut Self {
        self.validators.push(validator);
        self
    }

    /// The system prompt as the opening message, when one is configured.
    pub fn system_message(&self) -> Option<ChatMessage> {
        self.config
            .system_prompt
            .as_deref()
            .filter(|prompt| !prompt.is_empty())
            .map(ChatMessage::system)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl Serialize for Scenario {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Scenario", 4)?;
        state.serialize_field("config", &self.config)?;
        state.serialize_field("turns", &self.turns)?;
        state.serialize_field("created_at", &self.created_at)?;
        state.serialize_field("num_validators", &self.validators.len())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> ScenarioConfig {
        ScenarioConfig::new("test_scenario", "A test scenario")
    }

    #[test]
    fn config_defaults() {
        let config = config();
        assert_eq!(config.temperature, DEFAULT_TEMPERATURE);
        assert!(config.system_prompt.is_none());
        assert!(config.max_tokens.is_none());

        let parsed: ScenarioConfig = serde_json::from_value(json!({"name": "x"})).unwrap();
        assert_eq!(parsed.temperature, DEFAULT_TEMPERATURE);
        assert!(parsed.stop_sequences.is_empty());
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = Scenario::new(ScenarioConfig::new("  ", "blank")).unwrap_err();
        assert!(matches!(err, ScenarioError::EmptyName));
    }

    #[test]
    fn chained_appends_keep_declaration_order() {
        let mut scenario = Scenario::new(config()).unwrap();
        scenario
            .add_user_input("Hello", &["hi"])
            .add_state_check("Inventory intact", &["5 in stock"])
            .add_user_input("Bye", &[])
            .add_validator("always", |_, _| Ok(true));

        let kinds: Vec<TurnKind> = scenario.turns().iter().map(|turn| turn.kind).collect();
        assert_eq!(
            kinds,
            vec![TurnKind::UserInput, TurnKind::StateCheck, TurnKind::UserInput]
        );
        assert_eq!(scenario.turns()[0].content, "Hello");
        assert!(!scenario.turns()[2].has_patterns());
        assert_eq!(scenario.len(), 3);
        assert_eq!(scenario.validators()[0].name(), "always");
    }

    #[test]
    fn system_message_only_when_prompt_set() {
        let plain = Scenario::new(config()).unwrap();
        assert!(plain.system_message().is_none());

        let prompted =
            Scenario::new(config().with_system_prompt("You are a vending machine.")).unwrap();
        let message = prompted.system_message().unwrap();
        assert_eq!(message, ChatMessage::system("You are a vending machine."));
    }

    #[test]
    fn generation_options_follow_config() {
        let config = config()
            .with_temperature(0.1)
            .with_max_tokens(500)
            .with_stop_sequences(["END"]);
        let options = config.generation_options();
        assert_eq!(options.temperature, 0.1);
        assert_eq!(options.max_tokens, Some(500));
        assert_eq!(options.stop, vec!["END".to_string()]);
    }

    #[test]
    fn serializes_snapshot_shape() {
        let mut scenario = Scenario::new(config()).unwrap();
        scenario
            .add_turn(Turn::user_input("Hi").with_metadata("step", json!(1)))
            .add_validator("check", |_, _| Ok(true));

        let value = serde_json::to_value(&scenario).unwrap();
        assert_eq!(value["config"]["name"], json!("test_scenario"));
        assert_eq!(value["turns"][0]["turn_type"], json!("user_input"));
        assert_eq!(value["turns"][0]["metadata"]["step"], json!(1));
        assert_eq!(value["num_validators"], json!(1));
        assert!(value["created_at"].is_string());
    }
}
