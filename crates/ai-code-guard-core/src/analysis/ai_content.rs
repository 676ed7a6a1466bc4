use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use super::{display_path, list_files_blocking};
use crate::llm::{parse_model_json, ChatModel, ChatRequest};
use crate::repository::{classify, read_lossy, FileCategory};

/// Characters of each file sent to the model.
const MAX_SCAN_CHARS: usize = 4_000;

/// Well-known AI/ML package names matched in dependency manifests.
pub const AI_PACKAGES: &[&str] = &[
    "tensorflow",
    "torch",
    "pytorch",
    "torchvision",
    "keras",
    "scikit-learn",
    "sklearn",
    "transformers",
    "sentence-transformers",
    "huggingface_hub",
    "diffusers",
    "openai",
    "anthropic",
    "langchain",
    "langgraph",
    "llama-index",
    "llama_index",
    "litellm",
    "tiktoken",
    "spacy",
    "nltk",
    "gensim",
    "opencv-python",
    "xgboost",
    "lightgbm",
    "catboost",
    "onnxruntime",
    "jax",
    "mxnet",
    "fastai",
    "@tensorflow/tfjs",
    "brain.js",
    "candle-core",
    "tch",
    "ort",
];

const SYSTEM_PROMPT: &str = "You are an AI content analyzer. Return only valid JSON.";

fn documentation_prompt(file_path: &str, content: &str) -> String {
    format!(
        "Analyze this documentation file and identify any mentions or indications of AI usage.\n\
         Look for:\n\
         1. Direct mentions of AI, machine learning, neural networks\n\
         2. AI libraries or frameworks (e.g., TensorFlow, PyTorch)\n\
         3. AI-related features or capabilities\n\
         4. AI model training or usage instructions\n\
         5. AI-related configurations\n\n\
         File content:\n{content}\n\n\
         Return ONLY a JSON object:\n\
         {{\"file_path\": \"{file_path}\", \"has_ai_content\": true/false, \
         \"ai_mentions\": [{{\"type\": \"framework|technology|feature|configuration\", \
         \"mention\": \"specific mention\", \"context\": \"brief context\"}}], \
         \"summary\": \"brief summary of AI usage in this file\"}}"
    )
}

fn dependency_prompt(file_path: &str, content: &str) -> String {
    format!(
        "Analyze this dependency file and identify any AI-related packages or libraries.\n\
         Look for:\n\
         1. Machine learning libraries (tensorflow, pytorch, scikit-learn, etc.)\n\
         2. Deep learning frameworks\n\
         3. NLP libraries (transformers, spacy, nltk, etc.)\n\
         4. Computer vision libraries\n\
         5. AI/ML utilities and tools\n\
         6. Model serving dependencies\n\
         7. LLM clients\n\
         8. Agent frameworks\n\n\
         File content:\n{content}\n\n\
         Return ONLY a JSON object:\n\
         {{\"file_path\": \"{file_path}\", \"has_ai_content\": true/false, \
         \"ai_mentions\": [{{\"type\": \"library|framework|tool\", \
         \"mention\": \"package name and version\", \"context\": \"purpose of this AI package\"}}], \
         \"summary\": \"brief summary of AI dependencies found\"}}"
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiMention {
    #[serde(rename = "type", alias = "kind", default)]
    pub kind: String,
    pub mention: String,
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAiContent {
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub has_ai_content: bool,
    #[serde(default)]
    pub ai_mentions: Vec<AiMention>,
    #[serde(default)]
    pub summary: String,
}

/// Results for one category of files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScan {
    pub files_scanned: usize,
    pub files_with_ai_content: usize,
    /// Only files where AI content was found.
    pub ai_mentions: Vec<FileAiContent>,
}

impl CategoryScan {
    fn record(&mut self, result: FileAiContent) {
        self.files_scanned += 1;
        if result.has_ai_content {
            self.files_with_ai_content += 1;
            self.ai_mentions.push(result);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_files_scanned: usize,
    pub total_ai_files: usize,
    /// De-duplicated and sorted.
    pub unique_ai_technologies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiContentScan {
    pub documentation: CategoryScan,
    pub dependencies: CategoryScan,
    pub summary: ScanSummary,
}

impl AiContentScan {
    fn finalize(&mut self) {
        let technologies: BTreeSet<String> = self
            .documentation
            .ai_mentions
            .iter()
            .chain(&self.dependencies.ai_mentions)
            .flat_map(|file| file.ai_mentions.iter())
            .map(|mention| mention.mention.trim().to_string())
            .filter(|mention| !mention.is_empty())
            .collect();
        self.summary = ScanSummary {
            total_files_scanned: self.documentation.files_scanned + self.dependencies.files_scanned,
            total_ai_files: self.documentation.files_with_ai_content
                + self.dependencies.files_with_ai_content,
            unique_ai_technologies: technologies.into_iter().collect(),
        };
    }
}

/// Finds AI-related content in documentation and dependency manifests.
pub struct AiContentScanner {
    model: Arc<dyn ChatModel>,
    packages: AhoCorasick,
}

impl AiContentScanner {
    pub fn new(model: Arc<dyn ChatModel>) -> Result<Self> {
        let packages = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostLongest)
            .build(AI_PACKAGES)
            .context("failed to build AI package automaton")?;
        Ok(Self { model, packages })
    }

    /// Known AI packages named in `content`, in order of first appearance.
    pub fn known_packages(&self, content: &str) -> Vec<&'static str> {
        let bytes = content.as_bytes();
        let is_name_byte = |b: u8| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/' | b'@');
        let mut found = Vec::new();
        for mat in self.packages.find_iter(content) {
            let before = mat.start().checked_sub(1).map(|idx| bytes[idx]);
            let after = bytes.get(mat.end()).copied();
            if before.is_some_and(is_name_byte) || after.is_some_and(is_name_byte) {
                continue;
            }
            let name = AI_PACKAGES[mat.pattern().as_usize()];
            if !found.contains(&name) {
                trace!(package = name, "matched known AI package");
                found.push(name);
            }
        }
        found
    }

    /// Scan every documentation and dependency file under `root`.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub async fn scan(&self, root: &Path) -> Result<AiContentScan> {
        let files = list_files_blocking(root).await?;
        let mut scan = AiContentScan::default();

        for relative in &files {
            let category = classify(relative);
            if !matches!(category, FileCategory::Documentation | FileCategory::Dependency) {
                continue;
            }
            let Some(content) = read_lossy(&root.join(relative)) else {
                continue;
            };
            if content.trim().is_empty() {
                continue;
            }
            let file_path = display_path(relative);
            debug!(file = %file_path, ?category, "scanning for AI content");
            match category {
                FileCategory::Dependency => {
                    let result = self.check_dependency(&file_path, &content).await;
                    scan.dependencies.record(result);
                }
                _ => {
                    let result = self.check_documentation(&file_path, &content).await;
                    scan.documentation.record(result);
                }
            }
        }

        scan.finalize();
        info!(
            scanned = scan.summary.total_files_scanned,
            with_ai = scan.summary.total_ai_files,
            "AI content scan finished"
        );
        Ok(scan)
    }

    async fn check_documentation(&self, file_path: &str, content: &str) -> FileAiContent {
        let prompt = documentation_prompt(file_path, head(content));
        self.ask(file_path, prompt).await
    }

    async fn check_dependency(&self, file_path: &str, content: &str) -> FileAiContent {
        let prompt = dependency_prompt(file_path, head(content));
        let mut result = self.ask(file_path, prompt).await;
        for package in self.known_packages(content) {
            let already = result
                .ai_mentions
                .iter()
                .any(|m| m.mention.to_ascii_lowercase().contains(package));
            if !already {
                result.ai_mentions.push(AiMention {
                    kind: "library".to_string(),
                    mention: package.to_string(),
                    context: "known AI/ML package".to_string(),
                });
            }
            result.has_ai_content = true;
        }
        result
    }

    async fn ask(&self, file_path: &str, prompt: String) -> FileAiContent {
        let request = ChatRequest::new(SYSTEM_PROMPT, prompt)
            .with_temperature(0.0)
            .expect_json();
        let outcome = match self.model.complete(&request).await {
            Ok(answer) => parse_model_json::<FileAiContent>(&answer),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(mut result) => {
                result.file_path = file_path.to_string();
                if !result.ai_mentions.is_empty() {
                    result.has_ai_content = true;
                }
                result
            }
            Err(err) => {
                warn!(file = file_path, error = %err, "error in LLM analysis");
                FileAiContent {
                    file_path: file_path.to_string(),
                    has_ai_content: false,
                    ai_mentions: Vec::new(),
                    summary: format!("Error during analysis: {err}"),
                }
            }
        }
    }
}

fn head(content: &str) -> &str {
    match content.char_indices().nth(MAX_SCAN_CHARS) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}
