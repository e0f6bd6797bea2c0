use chrono::{DateTime, Utc};
use serde::{ser::SerializeStruct, Deserialize, Serialize, Serializer};
use serde_json::{json, Value};

use crate::{history::Transcript, types::Metadata};

/// Metric recorded for a scenario whose run never produced a transcript.
pub const RUN_ABORTED_METRIC: &str = "run_aborted";

/// One scored check: a pattern-matched turn or a custom validator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetric {
    pub name: String,
    pub value: f64,
    pub passed: bool,
    #[serde(default)]
    pub details: Metadata,
}

impl EvaluationMetric {
    pub fn new(name: impl Into<String>, value: f64, passed: bool) -> Self {
        Self {
            name: name.into(),
            value,
            passed,
            details: Metadata::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvaluationResult {
    pub scenario_name: String,
    pub model_name: String,
    #[serde(default)]
    pub metrics: Vec<EvaluationMetric>,
    #[serde(default)]
    pub overall_passed: bool,
    pub evaluated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl EvaluationResult {
    pub fn new(scenario_name: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            scenario_name: scenario_name.into(),
            model_name: model_name.into(),
            metrics: Vec::new(),
            overall_passed: false,
            evaluated_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    /// Failed verdict for a run the adapter cut short.
    pub fn aborted(
        scenario_name: impl Into<String>,
        model_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(scenario_name, model_name);
        result.add_metric(
            EvaluationMetric::new(RUN_ABORTED_METRIC, 0.0, false)
                .with_detail("error", json!(error.into())),
        );
        result.finalize()
    }

    pub fn add_metric(&mut self, metric: EvaluationMetric) {
        self.metrics.push(metric);
    }

    /// Settles the verdict: every metric passed, vacuously true when empty.
    pub fn finalize(mut self) -> Self {
        self.overall_passed = self.metrics.iter().all(|metric| metric.passed);
        self
    }

    pub fn metric(&self, name: &str) -> Option<&EvaluationMetric> {
        self.metrics.iter().find(|metric| metric.name == name)
    }

    pub fn passed_count(&self) -> usize {
        self.metrics.iter().filter(|metric| metric.passed).count()
    }

    /// Share of passed metrics; 0.0 when nothing was scored.
    pub fn pass_rate(&self) -> f64 {
        if self.metrics.is_empty() {
            return 0.0;
        }
        self.passed_count() as f64 / self.metrics.len() as f64
    }
}

impl Serialize for EvaluationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("EvaluationResult", 7)?;
        state.serialize_field("scenario_name", &self.scenario_name)?;
        state.serialize_field("model_name", &self.model_name)?;
        state.serialize_field("metrics", &self.metrics)?;
        state.serialize_field("overall_passed", &self.overall_passed)?;
        state.serialize_field("pass_rate", &self.pass_rate())?;
        state.serialize_field("evaluated_at", &self.evaluated_at)?;
        state.serialize_field("metadata", &self.metadata)?;
        state.end()
    }
}

#[derive(Debug, Clone)]
pub enum CaseOutcome {
    Evaluated {
        transcript: Transcript,
        result: EvaluationResult,
    },
    /// The adapter failed mid-run. `result` is a failed verdict carrying
    /// the error so batch summaries still count the scenario.
    Aborted {
        error: String,
        result: EvaluationResult,
    },
}

#[derive(Debug, Clone)]
pub struct CaseReport {
    pub name: String,
    pub outcome: CaseOutcome,
}

impl CaseReport {
    pub fn pass(&self) -> bool {
        matches!(&self.outcome, CaseOutcome::Evaluated { result, .. } if result.overall_passed)
    }

    pub fn result(&self) -> &EvaluationResult {
        match &self.outcome {
            CaseOutcome::Evaluated { result, .. } | CaseOutcome::Aborted { result, .. } => result,
        }
    }

    pub fn transcript(&self) -> Option<&Transcript> {
        match &self.outcome {
            CaseOutcome::Evaluated { transcript, .. } => Some(transcript),
            CaseOutcome::Aborted { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvalReport {
    pub total: usize,
    pub passed: usize,
    pub cases: Vec<CaseReport>,
}

impl EvalReport {
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }

    /// One result per case, aborted runs included as failures.
    pub fn results(&self) -> Vec<EvaluationResult> {
        self.cases.iter().map(|case| case.result().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_result_passes_vacuously() {
        let result = EvaluationResult::new("s", "m").finalize();
        assert!(result.overall_passed);
        assert_eq!(result.pass_rate(), 0.0);
    }

    #[test]
    fn one_failure_fails_the_result() {
        let mut result = EvaluationResult::new("s", "m");
        result.add_metric(EvaluationMetric::new("a", 1.0, true));
        result.add_metric(EvaluationMetric::new("b", 0.5, false));
        let result = result.finalize();

        assert!(!result.overall_passed);
        assert_eq!(result.pass_rate(), 0.5);
        assert_eq!(result.metric("b").map(|metric| metric.value), Some(0.5));
        assert!(result.metric("missing").is_none());
    }

    #[test]
    fn serialized_form_carries_pass_rate() {
        let mut result = EvaluationResult::new("basic_vending_machine", "mock-model");
        result.add_metric(EvaluationMetric::new("a", 1.0, true).with_detail("key", json!("value")));
        let result = result.finalize();

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["pass_rate"], json!(1.0));
        assert_eq!(value["overall_passed"], json!(true));
        assert_eq!(value["metrics"][0]["details"]["key"], json!("value"));
        assert!(value["evaluated_at"].is_string());

        let back: EvaluationResult = serde_json::from_value(value).unwrap();
        assert_eq!(back.metrics, result.metrics);
    }

    #[test]
    fn aborted_result_fails_with_error_detail() {
        let result = EvaluationResult::aborted("basic", "gpt-4", "connection reset");
        assert!(!result.overall_passed);
        assert_eq!(result.pass_rate(), 0.0);
        let metric = result.metric(RUN_ABORTED_METRIC).unwrap();
        assert_eq!(metric.details["error"], json!("connection reset"));
    }
}
