use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, instrument, warn};

use super::{CodeAnalyzer, RepositoryAnalysis, DEFAULT_MAX_FILES};
use crate::llm::{parse_model_json, ChatModel, ChatRequest};

/// Use cases scored below this are dropped.
pub const MIN_CONFIDENCE: u8 = 5;

const SYSTEM_PROMPT: &str = "You are an expert at extracting structured data from AI analysis reports. Extract AI use cases from the provided analysis and return them as JSON. Only include use cases with an AI confidence score of 5 or more.";

fn extraction_prompt(codebase: &str, analysis: &str) -> String {
    format!(
        "Extract the AI use cases from this analysis of the `{codebase}` codebase.\n\n\
         For each use case give its functionality (what the AI does), an AI confidence \
         score from 1 to 10, the input data it uses, the output or automated decision it \
         produces, and the files involved.\n\n\
         Return a JSON object of the form:\n\
         {{\"codebase\": \"{codebase}\", \"use_cases\": [{{\"name\": \"...\", \"functionality\": \"...\", \
         \"ai_confidence_score\": 7, \"input_data\": \"...\", \"output_data\": \"...\", \
         \"files_involved\": [\"path\"]}}]}}\n\n\
         Analysis:\n\n{analysis}"
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseCase {
    pub name: String,
    #[serde(default)]
    pub functionality: String,
    /// Clamped to `1..=10`.
    #[serde(deserialize_with = "confidence_score")]
    pub ai_confidence_score: u8,
    #[serde(default)]
    pub input_data: String,
    #[serde(default)]
    pub output_data: String,
    #[serde(default)]
    pub files_involved: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub codebase: String,
    pub use_cases: Vec<UseCase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractedUsage {
    #[serde(default)]
    codebase: String,
    #[serde(default)]
    use_cases: Vec<UseCase>,
}

fn confidence_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    let raw = match &value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| serde::de::Error::custom(format!("invalid confidence score {value}")))?;
    Ok(raw.round().clamp(1.0, 10.0) as u8)
}

/// Identifies concrete AI use cases in a local codebase.
pub struct UsageExtractor {
    analyzer: CodeAnalyzer,
    model: Arc<dyn ChatModel>,
    max_files: usize,
}

impl UsageExtractor {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            analyzer: CodeAnalyzer::new(model.clone()),
            model,
            max_files: DEFAULT_MAX_FILES,
        }
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// Never fails: errors are reported in [`UsageReport::error`].
    #[instrument(skip(self), fields(root = %root.display()))]
    pub async fn extract(&self, root: &Path) -> UsageReport {
        let codebase = codebase_name(root);
        match self.try_extract(root, &codebase).await {
            Ok(report) => {
                info!(use_cases = report.use_cases.len(), "usage extraction completed");
                report
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "usage extraction failed");
                UsageReport {
                    codebase,
                    use_cases: Vec::new(),
                    error: Some(format!("{err:#}")),
                }
            }
        }
    }

    async fn try_extract(&self, root: &Path, codebase: &str) -> Result<UsageReport> {
        let analysis = self
            .analyzer
            .analyze_repository(root, self.max_files)
            .await
            .context("repository analysis failed")?;
        let request = ChatRequest::new(
            SYSTEM_PROMPT,
            extraction_prompt(codebase, &analysis_text(&analysis)),
        )
        .with_temperature(0.1)
        .expect_json();
        let answer = self
            .model
            .complete(&request)
            .await
            .context("model call failed for use case extraction")?;
        let extracted: ExtractedUsage =
            parse_model_json(&answer).context("use case answer is not valid JSON")?;

        let use_cases = extracted
            .use_cases
            .into_iter()
            .filter(|case| case.ai_confidence_score >= MIN_CONFIDENCE)
            .collect();
        let codebase = if extracted.codebase.trim().is_empty() {
            codebase.to_string()
        } else {
            extracted.codebase
        };
        Ok(UsageReport {
            codebase,
            use_cases,
            error: None,
        })
    }
}

fn analysis_text(analysis: &RepositoryAnalysis) -> String {
    let mut text = analysis.repository_summary.clone();
    for file in &analysis.file_analyses {
        text.push_str(&format!(
            "\n\nFile: {}\nCapabilities: {}\nSummary: {}",
            file.file_path,
            file.analysis.ai_capabilities.join(", "),
            file.analysis.technical_summary
        ));
    }
    text
}

fn codebase_name(root: &Path) -> String {
    let absolute = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    absolute
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| absolute.display().to_string())
}
