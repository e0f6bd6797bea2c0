use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::{
    error::ExportError,
    eval::{report::EvaluationResult, scenario::Scenario},
    history::Transcript,
};

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), ExportError> {
    ensure_parent_dir(path)?;
    let mut writer = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn save_evaluation_result(result: &EvaluationResult, path: impl AsRef<Path>) -> Result<(), ExportError> {
    write_json(result, path.as_ref())
}

pub fn save_transcript(transcript: &Transcript, path: impl AsRef<Path>) -> Result<(), ExportError> {
    write_json(transcript, path.as_ref())
}

pub fn save_scenario(scenario: &Scenario, path: impl AsRef<Path>) -> Result<(), ExportError> {
    write_json(scenario, path.as_ref())
}

#[derive(Debug, Serialize)]
struct BatchSummary<'a> {
    timestamp: &'a str,
    num_results: usize,
    results: &'a [EvaluationResult],
    aggregate_pass_rate: f64,
}

/// Mean of the per-result pass rates; 0.0 for an empty batch.
pub fn aggregate_pass_rate(results: &[EvaluationResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(EvaluationResult::pass_rate).sum::<f64>() / results.len() as f64
}

/// Writes one file per result plus a summary, all sharing one timestamp.
/// Returns the summary path.
pub fn save_batch_results(
    results: &[EvaluationResult],
    output_dir: impl AsRef<Path>,
    prefix: &str,
) -> Result<PathBuf, ExportError> {
    let output_dir = output_dir.as_ref();
    fs::create_dir_all(output_dir)?;

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();

    for (index, result) in results.iter().enumerate() {
        let path = output_dir.join(format!("{prefix}_{index}_{timestamp}.json"));
        save_evaluation_result(result, &path)?;
    }

    let summary = BatchSummary {
        timestamp: &timestamp,
        num_results: results.len(),
        results,
        aggregate_pass_rate: aggregate_pass_rate(results),
    };
    let summary_path = output_dir.join(format!("{prefix}_summary_{timestamp}.json"));
    write_json(&summary, &summary_path)?;

    info!(path = %summary_path.display(), results = results.len(), "saved batch results");
    Ok(summary_path)
}

pub fn load_evaluation_result(path: impl AsRef<Path>) -> Result<Value, ExportError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
