use std::sync::Arc;

use tracing::{error, info};

use crate::{
    conversation::ConversationRunner,
    eval::{
        evaluator::Evaluator,
        report::{CaseOutcome, CaseReport, EvalReport, EvaluationResult},
        scenario::Scenario,
    },
    providers::ModelAdapter,
};

/// Runs scenarios one after another and grades each transcript.
///
/// An adapter failure ends that scenario's run and is recorded in its case
/// report; the remaining scenarios still run.
pub struct EvalRunner {
    conversation: ConversationRunner,
    evaluator: Evaluator,
}

impl EvalRunner {
    pub fn new(adapter: Arc<dyn ModelAdapter>) -> Self {
        Self {
            conversation: ConversationRunner::new(adapter),
            evaluator: Evaluator::new(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Evaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub async fn run(&self, scenarios: &[Scenario], verbose: bool) -> EvalReport {
        let mut cases = Vec::with_capacity(scenarios.len());
        let mut passed = 0;

        for scenario in scenarios {
            let case = self.run_scenario(scenario, verbose).await;
            if case.pass() {
                passed += 1;
            }
            cases.push(case);
        }

        EvalReport {
            total: scenarios.len(),
            passed,
            cases,
        }
    }

    async fn run_scenario(&self, scenario: &Scenario, verbose: bool) -> CaseReport {
        info!(scenario = scenario.name(), turns = scenario.len(), "running scenario");

        let outcome = match self.conversation.run_scenario(scenario, verbose).await {
            Ok(transcript) => {
                let result = self.evaluator.evaluate(&transcript, scenario);
                CaseOutcome::Evaluated { transcript, result }
            }
            Err(err) => {
                error!(scenario = scenario.name(), error = %err, "scenario run aborted");
                let error = err.to_string();
                let result = EvaluationResult::aborted(
                    scenario.name(),
                    self.conversation.adapter().model_name(),
                    error.clone(),
                );
                CaseOutcome::Aborted { error, result }
            }
        };

        CaseReport {
            name: scenario.name().to_string(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        eval::{report::RUN_ABORTED_METRIC, scenario::ScenarioConfig},
        export::aggregate_pass_rate,
        providers::scripted::ScriptedProvider,
    };

    fn scenario(name: &str, patterns: &[&str]) -> Scenario {
        let mut scenario = Scenario::new(ScenarioConfig::new(name, "batch")).unwrap();
        scenario.add_user_input("What's the price?", patterns);
        scenario
    }

    #[tokio::test]
    async fn counts_passing_cases() {
        let provider = ScriptedProvider::default()
            .with_responses(["The price is $5.00", "Sorry, sold out"]);
        let runner = EvalRunner::new(Arc::new(provider));

        let report = runner
            .run(&[scenario("first", &["price"]), scenario("second", &["price"])], false)
            .await;

        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 1);
        assert!(report.cases[0].pass());
        assert!(!report.cases[1].pass());
        assert_eq!(report.results().len(), 2);
        assert!(!report.all_passed());
    }

    #[tokio::test]
    async fn aborted_case_is_reported_and_batch_continues() {
        let provider = ScriptedProvider::default()
            .with_responses(["price is $5"])
            .fail_on_call(1, "connection reset");
        let runner = EvalRunner::new(Arc::new(provider));

        let report = runner
            .run(&[scenario("broken", &["price"]), scenario("next", &["price"])], false)
            .await;

        assert!(matches!(
            &report.cases[0].outcome,
            CaseOutcome::Aborted { error, .. } if error.contains("connection reset")
        ));
        assert!(report.cases[0].transcript().is_none());
        assert!(report.cases[1].pass());
        assert_eq!(report.passed, 1);
    }

    #[tokio::test]
    async fn aborted_case_counts_against_batch_results() {
        let provider = ScriptedProvider::new("flaky")
            .with_responses(["price is $5"])
            .fail_on_call(1, "connection reset");
        let runner = EvalRunner::new(Arc::new(provider));

        let report = runner
            .run(&[scenario("broken", &["price"]), scenario("next", &["price"])], false)
            .await;

        let results = report.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].scenario_name, "broken");
        assert_eq!(results[0].model_name, "flaky");
        assert!(!results[0].overall_passed);
        assert!(results[0].metric(RUN_ABORTED_METRIC).is_some());
        assert_eq!(aggregate_pass_rate(&results), 0.5);
    }
}
