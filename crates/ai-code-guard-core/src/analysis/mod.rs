//! LLM-assisted analysis of a local repository checkout.

mod ai_content;
mod code;
mod usage;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

pub use ai_content::{
    AiContentScan, AiContentScanner, AiMention, CategoryScan, FileAiContent, ScanSummary,
    AI_PACKAGES,
};
pub use code::{CodeAnalyzer, DEFAULT_MAX_FILES, MAX_FILE_CHARS};
pub use usage::{UsageExtractor, UsageReport, UseCase, MIN_CONFIDENCE};

const UNKNOWN: &str = "Unknown";

fn unknown() -> String {
    UNKNOWN.to_string()
}

/// Per-file assessment returned by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnalysis {
    #[serde(default, deserialize_with = "list_or_string")]
    pub ai_capabilities: Vec<String>,
    #[serde(default = "unknown", deserialize_with = "string_or_list")]
    pub data_processing: String,
    #[serde(default = "unknown", deserialize_with = "string_or_list")]
    pub user_impact: String,
    #[serde(default = "unknown", deserialize_with = "string_or_list")]
    pub regulatory_concerns: String,
    #[serde(default = "unknown", deserialize_with = "string_or_list")]
    pub technical_summary: String,
}

impl FileAnalysis {
    /// Used when the model answer is not JSON: the raw answer becomes the summary.
    pub fn from_raw(raw: &str) -> Self {
        Self {
            ai_capabilities: Vec::new(),
            data_processing: unknown(),
            user_impact: unknown(),
            regulatory_concerns: unknown(),
            technical_summary: raw.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzedFile {
    pub file_path: String,
    pub analysis: FileAnalysis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RepositoryAnalysis {
    pub repository_summary: String,
    pub file_analyses: Vec<AnalyzedFile>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Text(String),
    List(Vec<serde_json::Value>),
    Other(serde_json::Value),
}

fn value_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Text(text) => text,
        Loose::List(items) => items
            .into_iter()
            .map(value_text)
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        Loose::Other(value) => value_text(value),
    })
}

fn list_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Text(text) if text.trim().is_empty() => Vec::new(),
        Loose::Text(text) => vec![text],
        Loose::List(items) => items
            .into_iter()
            .map(value_text)
            .filter(|item| !item.is_empty())
            .collect(),
        Loose::Other(serde_json::Value::Null) => Vec::new(),
        Loose::Other(value) => vec![value_text(value)],
    })
}

/// Walk `root` on the blocking pool.
pub(crate) async fn list_files_blocking(root: &Path) -> Result<Vec<PathBuf>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || crate::repository::list_files(&root))
        .await
        .context("file listing task panicked")?
}

/// Path with forward slashes, as shown to the model and in reports.
pub(crate) fn display_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
