use std::{
    collections::HashMap,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use regex::RegexBuilder;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    error::ValidatorError,
    eval::{
        report::{EvaluationMetric, EvaluationResult},
        scenario::{NamedValidator, Scenario, Turn, ValidatorFn},
    },
    history::Transcript,
};

const UNKNOWN_MODEL: &str = "unknown";
const TURN_CONTENT_PREVIEW: usize = 100;

/// Case-insensitive regex search OR case-insensitive substring containment.
///
/// A pattern that is not a valid regex only takes the substring path, so
/// `"$5"` and `"\$3\.50"` can sit in the same pattern list.
pub fn pattern_matches(pattern: &str, text: &str) -> bool {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => {
            if regex.is_match(text) {
                return true;
            }
        }
        Err(error) => {
            warn!(pattern, %error, "expected pattern is not a valid regex, using substring match only");
        }
    }

    text.to_lowercase().contains(&pattern.to_lowercase())
}

/// Name to validator lookup. Entries can be replaced but never removed.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<ValidatorFn>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the vending-machine validators.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::scenarios::register_builtin_validators(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, check: F) -> &mut Self
    where
        F: Fn(&Transcript, &Scenario) -> Result<bool, ValidatorError> + Send + Sync + 'static,
    {
        self.validators.insert(name.into(), Arc::new(check));
        self
    }

    pub fn get(&self, name: &str) -> Option<NamedValidator> {
        self.validators
            .get(name)
            .map(|check| NamedValidator::from_shared(name, Arc::clone(check)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("validators", &self.names())
            .finish()
    }
}

/// Scores a transcript against the scenario that produced it.
///
/// Holds no per-run state; `evaluate` can be called any number of times on
/// the same inputs and never mutates them.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    registry: ValidatorRegistry,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: ValidatorRegistry) -> Self {
        Self { registry }
    }

    pub fn register_validator<F>(&mut self, name: impl Into<String>, check: F) -> &mut Self
    where
        F: Fn(&Transcript, &Scenario) -> Result<bool, ValidatorError> + Send + Sync + 'static,
    {
        self.registry.register(name, check);
        self
    }

    pub fn validator(&self, name: &str) -> Option<NamedValidator> {
        self.registry.get(name)
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    pub fn evaluate(&self, transcript: &Transcript, scenario: &Scenario) -> EvaluationResult {
        let model_name = transcript.model_name().unwrap_or(UNKNOWN_MODEL);
        let mut result = EvaluationResult::new(scenario.name(), model_name);

        evaluate_patterns(transcript, scenario, &mut result);
        run_custom_validators(transcript, scenario, &mut result);

        let result = result.finalize();
        info!(
            scenario = %result.scenario_name,
            model = %result.model_name,
            metrics = result.metrics.len(),
            passed = result.passed_count(),
            overall_passed = result.overall_passed,
            "evaluation finished"
        );
        result
    }
}

fn preview(turn: &Turn) -> String {
    turn.content.chars().take(TURN_CONTENT_PREVIEW).collect()
}

/// Pattern-bearing turns are aligned with responses by position; turns
/// without patterns neither score nor consume a response.
fn evaluate_patterns(transcript: &Transcript, scenario: &Scenario, result: &mut EvaluationResult) {
    let responses = transcript.responses();
    let mut cursor = 0;

    for (turn_index, turn) in scenario.turns().iter().enumerate() {
        if !turn.has_patterns() {
            continue;
        }

        let name = format!("pattern_match_turn_{cursor}");

        let Some(response) = responses.get(cursor) else {
            debug!(turn_index, cursor, "no response left for pattern-bearing turn");
            result.add_metric(
                EvaluationMetric::new(name, 0.0, false)
                    .with_detail("error", json!("No response for this turn"))
                    .with_detail("turn_index", json!(turn_index)),
            );
            continue;
        };

        let (matched, missing): (Vec<&String>, Vec<&String>) = turn
            .expected_patterns
            .iter()
            .partition(|pattern| pattern_matches(pattern, &response.content));

        let value = matched.len() as f64 / turn.expected_patterns.len() as f64;
        let passed = missing.is_empty();
        debug!(turn_index, cursor, value, passed, "scored pattern-bearing turn");

        result.add_metric(
            EvaluationMetric::new(name, value, passed)
                .with_detail("matched", json!(matched))
                .with_detail("missing", json!(missing))
                .with_detail("turn_content", json!(preview(turn)))
                .with_detail("turn_index", json!(turn_index))
                .with_detail("response_index", json!(cursor)),
        );

        cursor += 1;
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Each validator runs behind its own failure boundary so one broken check
/// cannot hide the others.
fn run_custom_validators(transcript: &Transcript, scenario: &Scenario, result: &mut EvaluationResult) {
    for (index, validator) in scenario.validators().iter().enumerate() {
        let name = format!("custom_validator_{index}");
        let identity = Value::String(validator.name().to_string());

        let outcome = catch_unwind(AssertUnwindSafe(|| validator.call(transcript, scenario)))
            .unwrap_or_else(|payload| {
                Err(ValidatorError::new(format!(
                    "validator panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        let metric = match outcome {
            Ok(passed) => EvaluationMetric::new(name, if passed { 1.0 } else { 0.0 }, passed)
                .with_detail("validator_function", identity),
            Err(error) => {
                warn!(validator = validator.name(), %error, "custom validator failed");
                EvaluationMetric::new(name, 0.0, false)
                    .with_detail("error", json!(error.to_string()))
                    .with_detail("validator_function", identity)
            }
        };

        result.add_metric(metric);
    }
}
