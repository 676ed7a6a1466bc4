use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use super::{display_path, list_files_blocking, AnalyzedFile, FileAnalysis, RepositoryAnalysis};
use crate::llm::{parse_model_json, truncate, ChatModel, ChatRequest};
use crate::repository::{is_code_file, read_lossy};

pub const DEFAULT_MAX_FILES: usize = 50;
/// Longest file body sent to the model.
pub const MAX_FILE_CHARS: usize = 12_000;

const FILE_SYSTEM_PROMPT: &str = "You are a technical expert who reviews source code for AI capabilities, data processing and potential compliance issues with AI regulations.";

const REPO_SYSTEM_PROMPT: &str = "You are a technical expert who synthesises per-file code reviews into a repository-level assessment for EU AI Act compliance.";

fn file_prompt(file_path: &str, file_type: &str, content: &str) -> String {
    format!(
        "Analyze the following code file and describe its functionality, focusing on aspects relevant to AI regulation:\n\
         1. AI capabilities and algorithms used (if any)\n\
         2. Data processing and analysis techniques\n\
         3. User data collection or processing\n\
         4. Decision-making or automation features\n\
         5. Potential biases or fairness concerns\n\
         6. Transparency mechanisms\n\
         7. Safety and security measures\n\n\
         File path: {file_path}\n\n\
         ```{file_type}\n{content}\n```\n\n\
         Respond with a JSON object with these fields:\n\
         - ai_capabilities: list of specific AI capabilities identified\n\
         - data_processing: description of data processing methods\n\
         - user_impact: how the code might affect users\n\
         - regulatory_concerns: specific concerns related to AI regulations\n\
         - technical_summary: overall technical description\n\n\
         If the file is not relevant for AI regulation analysis, say so in technical_summary."
    )
}

fn repository_prompt(file_analyses: &str) -> String {
    format!(
        "Below are analyses of individual files from a GitHub repository.\n\n\
         {file_analyses}\n\n\
         Based on them, provide:\n\
         1. A detailed technical description of the repository's functionality\n\
         2. A list of the AI capabilities identified\n\
         3. The primary data processing methods\n\
         4. Potential impacts on users and society\n\
         5. An assessment of concerns relevant to AI regulation\n\n\
         Format the answer as a structured technical analysis that can be used to evaluate \
         compliance with the EU AI Act. Be precise about the AI capabilities."
    )
}

/// Sends code files to the chat model and summarises the results.
#[derive(Clone)]
pub struct CodeAnalyzer {
    model: Arc<dyn ChatModel>,
}

impl CodeAnalyzer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Analyse one repository-relative file. `None` for non-code, unreadable or blank files.
    pub async fn analyze_file(
        &self,
        root: &Path,
        relative: &Path,
    ) -> Result<Option<FileAnalysis>> {
        if !is_code_file(relative) {
            return Ok(None);
        }
        let Some(content) = read_lossy(&root.join(relative)) else {
            return Ok(None);
        };
        if content.trim().is_empty() {
            return Ok(None);
        }

        let file_path = display_path(relative);
        let file_type = relative
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_default();
        let request = ChatRequest::new(
            FILE_SYSTEM_PROMPT,
            file_prompt(&file_path, &file_type, &truncate(&content, MAX_FILE_CHARS)),
        )
        .expect_json();
        let answer = self
            .model
            .complete(&request)
            .await
            .with_context(|| format!("model call failed for {file_path}"))?;

        Ok(Some(match parse_model_json::<FileAnalysis>(&answer) {
            Ok(analysis) => analysis,
            Err(err) => {
                debug!(file = %file_path, error = %err, "model answer is not JSON, keeping raw text");
                FileAnalysis::from_raw(&answer)
            }
        }))
    }

    /// Analyse up to `max_files` code files, then ask the model for a repository summary.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub async fn analyze_repository(
        &self,
        root: &Path,
        max_files: usize,
    ) -> Result<RepositoryAnalysis> {
        let files = list_files_blocking(root).await?;
        let mut file_analyses = Vec::new();

        for relative in files.iter().filter(|path| is_code_file(path)) {
            if file_analyses.len() >= max_files {
                debug!(max_files, "file limit reached");
                break;
            }
            match self.analyze_file(root, relative).await {
                Ok(Some(analysis)) => file_analyses.push(AnalyzedFile {
                    file_path: display_path(relative),
                    analysis,
                }),
                Ok(None) => {}
                Err(err) => warn!(file = %relative.display(), error = %err, "error analyzing file"),
            }
        }
        info!(files = file_analyses.len(), "analyzed code files");

        let formatted = file_analyses
            .iter()
            .map(|item| {
                let analysis = serde_json::to_string_pretty(&item.analysis)
                    .unwrap_or_else(|_| item.analysis.technical_summary.clone());
                format!("File: {}\nAnalysis: {}", item.file_path, analysis)
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let request = ChatRequest::new(REPO_SYSTEM_PROMPT, repository_prompt(&formatted));
        let repository_summary = self
            .model
            .complete(&request)
            .await
            .context("model call failed for repository summary")?;

        Ok(RepositoryAnalysis {
            repository_summary,
            file_analyses,
        })
    }
}
