pub mod error;
pub mod types;
pub mod providers;
pub mod history;
pub mod conversation;
pub mod eval;
pub mod scenarios;
pub mod export;
pub mod logging;

pub use error::{AdapterError, ExportError, ScenarioError, ValidatorError};
pub use providers::{
    openai::{OpenAI, OpenAIConfig},
    scripted::ScriptedProvider,
    ModelAdapter,
};
pub use types::{
    ChatMessage, GenerationOptions, MessageRole, Metadata, ModelInfo, Response, TextStream,
    DEFAULT_TEMPERATURE,
};
pub use history::Transcript;
pub use conversation::ConversationRunner;
pub use eval::{
    document::ScenarioDocument,
    evaluator::{pattern_matches, Evaluator, ValidatorRegistry},
    report::{CaseOutcome, CaseReport, EvalReport, EvaluationMetric, EvaluationResult},
    runner::EvalRunner,
    scenario::{NamedValidator, Scenario, ScenarioConfig, Turn, TurnKind, ValidatorFn},
};
pub use logging::{init_logging, LogOptions};
