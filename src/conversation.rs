use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use crate::{
    eval::scenario::{Scenario, TurnKind},
    history::{Transcript, MODEL_NAME_KEY, SCENARIO_NAME_KEY},
    providers::ModelAdapter,
    types::{GenerationOptions, Response},
    AdapterError,
};

const LOG_PREVIEW: usize = 50;

fn preview(text: &str) -> String {
    text.chars().take(LOG_PREVIEW).collect()
}

/// Drives scenarios turn by turn against one model adapter.
///
/// Every adapter call receives the whole transcript so far, so the model has
/// to rebuild its state from the full conversation on each turn.
pub struct ConversationRunner {
    adapter: Arc<dyn ModelAdapter>,
}

impl ConversationRunner {
    pub fn new(adapter: Arc<dyn ModelAdapter>) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &Arc<dyn ModelAdapter> {
        &self.adapter
    }

    /// Runs every turn in order. The first adapter failure aborts the run and
    /// is returned as-is; no partial transcript survives.
    pub async fn run_scenario(
        &self,
        scenario: &Scenario,
        verbose: bool,
    ) -> Result<Transcript, AdapterError> {
        let mut transcript = Transcript::new();
        transcript.set_metadata(SCENARIO_NAME_KEY, json!(scenario.name()));
        transcript.set_metadata(MODEL_NAME_KEY, json!(self.adapter.model_name()));

        if let Some(system) = scenario.system_message() {
            transcript.push_system(system.content);
        }

        let options = scenario.config().generation_options();
        let total = scenario.len();

        for (index, turn) in scenario.turns().iter().enumerate() {
            log_turn(verbose, index, total, turn.kind, &turn.content);

            match turn.kind {
                TurnKind::UserInput => {
                    transcript.push_user(turn.content.clone());
                    let response = self.adapter.generate(transcript.messages(), &options).await?;
                    log_reply(verbose, &response);
                    transcript.add_response(response);
                }
                TurnKind::StateCheck => {}
            }
        }

        Ok(transcript)
    }

    /// Extends an existing transcript with one ad-hoc user message.
    pub async fn continue_conversation(
        &self,
        transcript: &mut Transcript,
        user_input: impl Into<String>,
        options: &GenerationOptions,
    ) -> Result<Response, AdapterError> {
        transcript.push_user(user_input);
        let response = self.adapter.generate(transcript.messages(), options).await?;
        transcript.add_response(response.clone());
        Ok(response)
    }
}

fn log_turn(verbose: bool, index: usize, total: usize, kind: TurnKind, content: &str) {
    let turn = index + 1;
    let content = preview(content);
    if verbose {
        info!(turn, total, ?kind, %content, "executing turn");
    } else {
        debug!(turn, total, ?kind, %content, "executing turn");
    }
}

fn log_reply(verbose: bool, response: &Response) {
    let content = preview(&response.content);
    if verbose {
        info!(model = %response.model, %content, "assistant replied");
    } else {
        debug!(model = %response.model, %content, "assistant replied");
    }
}
