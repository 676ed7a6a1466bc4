use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ai_code_guard_core::ai_act::AiActHandler;
use ai_code_guard_core::github::{extract_archive, parse_repo_url};
use ai_code_guard_core::llm::{ChatModel, ChatRequest, HashingEmbeddings};
use ai_code_guard_core::settings::{FileSettings, GuardSettings};
use ai_code_guard_core::workflow::RepositorySource;
use ai_code_guard_core::{
    render_report, CodeAnalyzer, ComplianceAnalyzer, ComplianceChecker, ComplianceReport,
    FetchedRepo, OutputFormat, RiskClass, Status,
};
use anyhow::Result;
use async_trait::async_trait;
use zip::write::FileOptions;

const ACT_TEXT: &str = "Article 5\nProhibited AI practices such as social scoring.\n\nArticle 6\nClassification rules for high-risk AI systems, including recruitment and selection of natural persons.\n\nArticle 50\nTransparency obligations for providers of chatbots.";

/// Serves a prebuilt zip archive instead of downloading one.
struct LocalArchive {
    archive: Vec<u8>,
    repos_dir: PathBuf,
}

#[async_trait]
impl RepositorySource for LocalArchive {
    async fn fetch(&self, url: &str, branch: &str) -> Result<FetchedRepo> {
        let reference = parse_repo_url(url)?;
        let path = self.repos_dir.join(reference.dir_name());
        let files_extracted = extract_archive(&self.archive, &path)?;
        Ok(FetchedRepo {
            reference,
            branch: branch.to_string(),
            path,
            files_extracted,
        })
    }
}

struct ScriptedModel;

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let prompt = request.user_prompt();
        Ok(if prompt.contains("Relevant sections from the EU AI Act") {
            "1. AI System Classification\nThe system is high-risk under Annex III (employment).\n\n2. Applicable EU AI Act Sections\nArticle 6.".to_string()
        } else if prompt.contains("File path:") {
            "```json\n{\"ai_capabilities\": [\"candidate ranking\"], \"data_processing\": \"CVs\", \"user_impact\": \"hiring decisions\", \"regulatory_concerns\": \"Annex III employment\", \"technical_summary\": \"scores applicants\"}\n```".to_string()
        } else {
            "The repository ranks job applicants using a trained classifier.".to_string()
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

fn archive() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = FileOptions::default();
    for (name, body) in [
        ("hiring-main/README.md", "# Hiring\nRanks applicants."),
        ("hiring-main/rank.py", "import sklearn\n\ndef rank(cvs):\n    return model.predict(cvs)\n"),
        ("hiring-main/node_modules/lib.js", "ignored()"),
    ] {
        writer.start_file(name, options).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn settings(data_dir: &Path) -> GuardSettings {
    GuardSettings::resolve(
        &FileSettings::default(),
        &[(GuardSettings::PROVIDER_ENV.to_string(), "noop".to_string())]
            .into_iter()
            .collect(),
    )
    .unwrap()
    .with_data_dir(data_dir)
}

fn checker(settings: &GuardSettings) -> ComplianceChecker {
    let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel);
    let act = Arc::new(
        AiActHandler::new(settings, Arc::new(HashingEmbeddings::default())).unwrap(),
    );
    ComplianceChecker::new(
        Arc::new(LocalArchive {
            archive: archive(),
            repos_dir: settings.repos_dir(),
        }),
        Arc::new(CodeAnalyzer::new(model.clone())),
        Arc::new(ComplianceAnalyzer::new(model, act)),
    )
}

#[tokio::test(flavor = "current_thread")]
async fn full_pipeline_produces_report() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join("eu_ai_act.txt"), ACT_TEXT).unwrap();
    let settings = settings(temp.path());

    let state = checker(&settings)
        .check_repository("https://github.com/acme/hiring.git", "main")
        .await;

    assert_eq!(state.status, Status::Completed, "error: {}", state.error);
    assert_eq!(state.messages.len(), 3);
    assert!(state.messages[0]
        .content
        .starts_with("Successfully downloaded repository from https://github.com/acme/hiring.git (branch: main)"));
    assert_eq!(
        state.repo_path.as_deref(),
        Some(settings.repos_dir().join("acme_hiring").as_path())
    );

    let analysis = state.repo_analysis.as_ref().unwrap();
    let analysed: Vec<_> = analysis
        .file_analyses
        .iter()
        .map(|f| f.file_path.as_str())
        .collect();
    assert_eq!(analysed, vec!["rank.py"]);
    assert_eq!(
        analysis.file_analyses[0].analysis.ai_capabilities,
        vec!["candidate ranking"]
    );

    let report = ComplianceReport::from(&state);
    assert_eq!(report.classification, RiskClass::HighRisk);
    assert!(!report.relevant_sections.is_empty());
    let human = render_report(&report, OutputFormat::Human).unwrap();
    assert!(human.contains("Classification: High-risk"));
    assert!(human.contains("Section 1"));
    assert!(settings.vectorstore_path().exists());
}

#[tokio::test(flavor = "current_thread")]
async fn invalid_url_stops_after_download() {
    let temp = tempfile::tempdir().unwrap();
    let settings = settings(temp.path());

    let state = checker(&settings)
        .check_repository("https://example.com/acme/hiring", "main")
        .await;

    assert_eq!(state.status, Status::Error);
    assert!(state.error.starts_with("Error downloading repository"));
    assert!(state.repo_analysis.is_none());
    assert!(state.compliance_analysis.is_none());
    assert!(!settings.vectorstore_path().exists());
}

#[tokio::test(flavor = "current_thread")]
#[ignore = "requires loopback networking"]
async fn missing_act_text_fails_compliance_stage() {
    let temp = tempfile::tempdir().unwrap();
    let settings = settings(temp.path());
    let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel);
    let act = Arc::new(
        AiActHandler::new(&settings, Arc::new(HashingEmbeddings::default()))
            .unwrap()
            .with_source_url("http://127.0.0.1:9/unreachable.pdf"),
    );
    let checker = ComplianceChecker::new(
        Arc::new(LocalArchive {
            archive: archive(),
            repos_dir: settings.repos_dir(),
        }),
        Arc::new(CodeAnalyzer::new(model.clone())),
        Arc::new(ComplianceAnalyzer::new(model, act)),
    );

    let state = checker
        .check_repository("https://github.com/acme/hiring", "main")
        .await;

    assert_eq!(state.status, Status::Error);
    assert!(state.repo_analysis.is_some());
    assert!(state.error.starts_with("Error analyzing compliance"));
}
