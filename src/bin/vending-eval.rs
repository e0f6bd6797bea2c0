use std::{path::PathBuf, sync::Arc};

use clap::{Parser, ValueEnum};
use vendingbench::{
    eval::report::CaseOutcome,
    export::{save_batch_results, save_transcript},
    init_logging,
    providers::openai::DEFAULT_MODEL,
    scenarios, EvalRunner, Evaluator, LogOptions, ModelAdapter, OpenAI, Scenario,
    ScenarioDocument, ScriptedProvider, ValidatorRegistry,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BuiltinScenario {
    Basic,
    Complex,
    EdgeCases,
    Custom,
}

impl BuiltinScenario {
    fn config_name(self) -> &'static str {
        match self {
            BuiltinScenario::Basic => "basic_vending_machine",
            BuiltinScenario::Complex => "complex_vending_machine",
            BuiltinScenario::EdgeCases => "edge_cases",
            BuiltinScenario::Custom => "custom_test",
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum AdapterKind {
    Scripted,
    Openai,
}

#[derive(Parser)]
#[command(name = "vending-eval")]
#[command(about = "Run coherence scenarios against a model and grade the transcripts")]
struct Args {
    /// Built-in scenario to run (repeatable)
    #[arg(long, value_enum)]
    scenario: Vec<BuiltinScenario>,

    /// Scenario document to run, YAML or JSON (repeatable)
    #[arg(long)]
    file: Vec<PathBuf>,

    /// Model adapter to use
    #[arg(long, value_enum, default_value = "scripted")]
    adapter: AdapterKind,

    /// Model identifier (provider-specific)
    #[arg(long)]
    model: Option<String>,

    /// Scripted reply, consumed in order across all scenarios (repeatable)
    #[arg(long)]
    response: Vec<String>,

    /// Directory for exported results and transcripts
    #[arg(long)]
    out: Option<PathBuf>,

    /// Log every turn at info level
    #[arg(long)]
    verbose: bool,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn load_scenarios(args: &Args, registry: &ValidatorRegistry) -> Result<Vec<Scenario>, Box<dyn std::error::Error>> {
    let mut loaded = Vec::new();

    let builtins = if args.scenario.is_empty() && args.file.is_empty() {
        vec![BuiltinScenario::Basic]
    } else {
        args.scenario.clone()
    };

    for builtin in builtins {
        if let Some(scenario) = scenarios::builtin(builtin.config_name()) {
            loaded.push(scenario?);
        }
    }

    for path in &args.file {
        loaded.push(ScenarioDocument::from_path(path)?.into_scenario(registry)?);
    }

    Ok(loaded)
}

fn build_adapter(args: &Args) -> Result<Arc<dyn ModelAdapter>, Box<dyn std::error::Error>> {
    let adapter: Arc<dyn ModelAdapter> = match args.adapter {
        AdapterKind::Scripted => {
            let model = args.model.clone().unwrap_or_else(|| "mock-model".to_string());
            Arc::new(ScriptedProvider::new(model).with_responses(args.response.iter().cloned()))
        }
        AdapterKind::Openai => {
            let model = args.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
            Arc::new(OpenAI::from_env(model)?)
        }
    };
    Ok(adapter)
}

fn transcript_file_name(index: usize, case_name: &str) -> String {
    format!("transcript_{index}_{case_name}.json")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut log_options = LogOptions::default();
    if let Some(path) = &args.log_file {
        log_options = log_options.with_log_file(path);
    }
    init_logging(&log_options)?;

    let registry = ValidatorRegistry::with_builtins();
    let scenarios = load_scenarios(&args, &registry)?;
    let adapter = build_adapter(&args)?;

    let runner = EvalRunner::new(adapter).with_evaluator(Evaluator::with_registry(registry));
    let report = runner.run(&scenarios, args.verbose).await;

    for case in &report.cases {
        match &case.outcome {
            CaseOutcome::Evaluated { result, .. } => {
                println!(
                    "{}: {} ({:.0}% of {} checks)",
                    case.name,
                    if result.overall_passed { "PASSED" } else { "FAILED" },
                    result.pass_rate() * 100.0,
                    result.metrics.len()
                );
                for metric in result.metrics.iter().filter(|metric| !metric.passed) {
                    println!("  - {} value={:.2} {}", metric.name, metric.value, serde_json::Value::Object(metric.details.clone()));
                }
            }
            CaseOutcome::Aborted { error, .. } => {
                println!("{}: ABORTED ({error})", case.name);
            }
        }
    }

    println!("Total: {}, Passed: {}", report.total, report.passed);

    if let Some(out) = &args.out {
        let summary = save_batch_results(&report.results(), out, "vendingbench")?;
        for (index, case) in report.cases.iter().enumerate() {
            if let Some(transcript) = case.transcript() {
                save_transcript(transcript, out.join(transcript_file_name(index, &case.name)))?;
            }
        }
        println!("Results written to {}", summary.display());
    }

    if report.all_passed() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_scenarios_get_distinct_transcript_files() {
        assert_ne!(
            transcript_file_name(0, "basic_vending_machine"),
            transcript_file_name(1, "basic_vending_machine")
        );
        assert_eq!(transcript_file_name(2, "custom_test"), "transcript_2_custom_test.json");
    }

    #[test]
    fn defaults_to_the_basic_scenario() {
        let args = Args::parse_from(["vending-eval"]);
        let loaded = load_scenarios(&args, &ValidatorRegistry::with_builtins()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name(), "basic_vending_machine");
    }

    #[test]
    fn repeated_builtin_flags_load_each_time() {
        let args = Args::parse_from(["vending-eval", "--scenario", "custom", "--scenario", "custom"]);
        let loaded = load_scenarios(&args, &ValidatorRegistry::with_builtins()).unwrap();
        assert_eq!(loaded.len(), 2);
    }
}
