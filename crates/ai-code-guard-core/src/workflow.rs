//! Three-stage compliance pipeline: download, analyse, assess.
//!
//! Each stage reads and updates a [`WorkflowState`]. A failing stage records its error in
//! the state and every later stage is skipped.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::ai_act::AiActHandler;
use crate::analysis::{CodeAnalyzer, RepositoryAnalysis, DEFAULT_MAX_FILES};
use crate::compliance::{ComplianceAnalysis, ComplianceAnalyzer};
use crate::github::{FetchedRepo, GitHubFetcher};
use crate::llm::{build_chat_model, build_embedding_model};
use crate::settings::GuardSettings;

pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    DownloadRepo,
    AnalyzeRepo,
    AnalyzeCompliance,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Starting,
    DownloadedRepo,
    AnalyzedRepo,
    Completed,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Starting => "starting",
            Self::DownloadedRepo => "downloaded_repo",
            Self::AnalyzedRepo => "analyzed_repo",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub repo_url: String,
    pub branch: String,
    pub repo_path: Option<PathBuf>,
    pub repo_analysis: Option<RepositoryAnalysis>,
    pub compliance_analysis: Option<ComplianceAnalysis>,
    pub messages: Vec<WorkflowMessage>,
    pub current_step: Step,
    pub status: Status,
    /// Empty until a stage fails.
    pub error: String,
}

impl WorkflowState {
    pub fn new(repo_url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            branch: branch.into(),
            repo_path: None,
            repo_analysis: None,
            compliance_analysis: None,
            messages: Vec::new(),
            current_step: Step::DownloadRepo,
            status: Status::Starting,
            error: String::new(),
        }
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }

    fn push_message(&mut self, content: String) {
        self.messages.push(WorkflowMessage {
            role: "system".to_string(),
            content,
        });
    }

    fn advance(&mut self, status: Status, next: Step, message: String) {
        info!(%status, "{message}");
        self.status = status;
        self.current_step = next;
        self.push_message(message);
    }

    fn fail(&mut self, message: String) {
        error!("{message}");
        self.error = message.clone();
        self.status = Status::Error;
        self.push_message(message);
    }
}

/// Produces a local checkout of a repository.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    async fn fetch(&self, url: &str, branch: &str) -> Result<FetchedRepo>;
}

/// Produces a technical description of a checkout.
#[async_trait]
pub trait RepositoryAnalyzer: Send + Sync {
    async fn analyze(&self, root: &Path, max_files: usize) -> Result<RepositoryAnalysis>;
}

/// Maps a technical description onto the regulation.
#[async_trait]
pub trait ComplianceAssessor: Send + Sync {
    async fn assess(&self, analysis: &RepositoryAnalysis) -> Result<ComplianceAnalysis>;
}

#[async_trait]
impl RepositorySource for GitHubFetcher {
    async fn fetch(&self, url: &str, branch: &str) -> Result<FetchedRepo> {
        GitHubFetcher::fetch(self, url, branch).await
    }
}

#[async_trait]
impl RepositoryAnalyzer for CodeAnalyzer {
    async fn analyze(&self, root: &Path, max_files: usize) -> Result<RepositoryAnalysis> {
        self.analyze_repository(root, max_files).await
    }
}

#[async_trait]
impl ComplianceAssessor for ComplianceAnalyzer {
    async fn assess(&self, analysis: &RepositoryAnalysis) -> Result<ComplianceAnalysis> {
        ComplianceAnalyzer::analyze(self, analysis).await
    }
}

/// Runs the pipeline for one repository.
pub struct ComplianceChecker {
    source: Arc<dyn RepositorySource>,
    analyzer: Arc<dyn RepositoryAnalyzer>,
    assessor: Arc<dyn ComplianceAssessor>,
    max_files: usize,
}

impl ComplianceChecker {
    pub fn new(
        source: Arc<dyn RepositorySource>,
        analyzer: Arc<dyn RepositoryAnalyzer>,
        assessor: Arc<dyn ComplianceAssessor>,
    ) -> Self {
        Self {
            source,
            analyzer,
            assessor,
            max_files: DEFAULT_MAX_FILES,
        }
    }

    /// Wire the GitHub fetcher, code analyzer and compliance analyzer from settings.
    pub fn from_settings(settings: &GuardSettings) -> Result<Self> {
        let chat = build_chat_model(settings)?;
        let embedder = build_embedding_model(settings)?;
        let act = Arc::new(AiActHandler::new(settings, embedder)?);
        Ok(Self::new(
            Arc::new(GitHubFetcher::new(settings)?),
            Arc::new(CodeAnalyzer::new(chat.clone())),
            Arc::new(ComplianceAnalyzer::new(chat, act)),
        ))
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// Run every stage until the end or the first error; the final state is returned.
    #[instrument(skip(self))]
    pub async fn check_repository(&self, repo_url: &str, branch: &str) -> WorkflowState {
        let mut state = WorkflowState::new(repo_url, branch);
        while state.current_step != Step::End && !state.has_error() {
            match state.current_step {
                Step::DownloadRepo => self.download_repo(&mut state).await,
                Step::AnalyzeRepo => self.analyze_repo(&mut state).await,
                Step::AnalyzeCompliance => self.analyze_compliance(&mut state).await,
                Step::End => {}
            }
        }
        state
    }

    async fn download_repo(&self, state: &mut WorkflowState) {
        if state.has_error() {
            return;
        }
        let outcome = self.source.fetch(&state.repo_url, &state.branch).await;
        match outcome {
            Ok(fetched) => {
                let message = format!(
                    "Successfully downloaded repository from {} (branch: {}) to {}",
                    state.repo_url,
                    fetched.branch,
                    fetched.path.display()
                );
                state.repo_path = Some(fetched.path);
                state.advance(Status::DownloadedRepo, Step::AnalyzeRepo, message);
            }
            Err(err) => state.fail(format!("Error downloading repository: {err:#}")),
        }
    }

    async fn analyze_repo(&self, state: &mut WorkflowState) {
        if state.has_error() {
            return;
        }
        let Some(repo_path) = state.repo_path.clone() else {
            state.fail("Error analyzing repository: no repository path".to_string());
            return;
        };
        match self.analyzer.analyze(&repo_path, self.max_files).await {
            Ok(analysis) => {
                state.repo_analysis = Some(analysis);
                state.advance(
                    Status::AnalyzedRepo,
                    Step::AnalyzeCompliance,
                    "Successfully analyzed repository code".to_string(),
                );
            }
            Err(err) => state.fail(format!("Error analyzing repository: {err:#}")),
        }
    }

    async fn analyze_compliance(&self, state: &mut WorkflowState) {
        if state.has_error() {
            return;
        }
        let Some(repo_analysis) = state.repo_analysis.as_ref() else {
            state.fail("Error analyzing compliance: no repository analysis".to_string());
            return;
        };
        let outcome = self.assessor.assess(repo_analysis).await;
        match outcome {
            Ok(analysis) => {
                state.compliance_analysis = Some(analysis);
                state.advance(
                    Status::Completed,
                    Step::End,
                    "Successfully analyzed compliance with EU AI Act".to_string(),
                );
            }
            Err(err) => state.fail(format!("Error analyzing compliance: {err:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::RiskClass;
    use crate::github::RepoRef;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Calls {
        fetch: AtomicUsize,
        analyze: AtomicUsize,
        assess: AtomicUsize,
    }

    struct FakeStages {
        calls: Arc<Calls>,
        fail_at: Option<Step>,
    }

    #[async_trait]
    impl RepositorySource for FakeStages {
        async fn fetch(&self, _url: &str, _branch: &str) -> Result<FetchedRepo> {
            self.calls.fetch.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(Step::DownloadRepo) {
                bail!("Failed to download repository: HTTP status 404");
            }
            Ok(FetchedRepo {
                reference: RepoRef {
                    owner: "octo".into(),
                    name: "demo".into(),
                },
                branch: "master".into(),
                path: PathBuf::from("/tmp/octo_demo"),
                files_extracted: 3,
            })
        }
    }

    #[async_trait]
    impl RepositoryAnalyzer for FakeStages {
        async fn analyze(&self, root: &Path, max_files: usize) -> Result<RepositoryAnalysis> {
            self.calls.analyze.fetch_add(1, Ordering::SeqCst);
            assert_eq!(root, Path::new("/tmp/octo_demo"));
            assert_eq!(max_files, 7);
            if self.fail_at == Some(Step::AnalyzeRepo) {
                bail!("model unavailable");
            }
            Ok(RepositoryAnalysis {
                repository_summary: "A chatbot".into(),
                file_analyses: Vec::new(),
            })
        }
    }

    #[async_trait]
    impl ComplianceAssessor for FakeStages {
        async fn assess(&self, analysis: &RepositoryAnalysis) -> Result<ComplianceAnalysis> {
            self.calls.assess.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(Step::AnalyzeCompliance) {
                bail!("index missing");
            }
            Ok(ComplianceAnalysis {
                classification: RiskClass::LimitedRisk,
                analysis: format!("Assessment of {}", analysis.repository_summary),
                relevant_sections: Vec::new(),
            })
        }
    }

    fn checker(fail_at: Option<Step>) -> (ComplianceChecker, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let stages = Arc::new(FakeStages {
            calls: calls.clone(),
            fail_at,
        });
        let checker = ComplianceChecker::new(stages.clone(), stages.clone(), stages)
            .with_max_files(7);
        (checker, calls)
    }

    #[test]
    fn initial_state_is_starting() {
        let state = WorkflowState::new("https://github.com/octo/demo", DEFAULT_BRANCH);
        assert_eq!(state.current_step, Step::DownloadRepo);
        assert_eq!(state.status, Status::Starting);
        assert!(!state.has_error());
        assert!(state.messages.is_empty());
    }

    #[tokio::test]
    async fn successful_run_completes_every_stage() {
        let (checker, calls) = checker(None);
        let state = checker
            .check_repository("https://github.com/octo/demo", "main")
            .await;

        assert_eq!(state.status, Status::Completed);
        assert_eq!(state.current_step, Step::End);
        assert!(state.error.is_empty());
        assert_eq!(state.messages.len(), 3);
        assert_eq!(
            state.messages[0].content,
            "Successfully downloaded repository from https://github.com/octo/demo (branch: master) to /tmp/octo_demo"
        );
        assert_eq!(
            state.compliance_analysis.unwrap().analysis,
            "Assessment of A chatbot"
        );
        assert_eq!(calls.assess.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn download_failure_stops_the_pipeline() {
        let (checker, calls) = checker(Some(Step::DownloadRepo));
        let state = checker
            .check_repository("https://github.com/octo/demo", "main")
            .await;

        assert_eq!(state.status, Status::Error);
        assert_eq!(
            state.error,
            "Error downloading repository: Failed to download repository: HTTP status 404"
        );
        assert_eq!(state.current_step, Step::DownloadRepo);
        assert_eq!(state.messages.last().unwrap().content, state.error);
        assert_eq!(calls.analyze.load(Ordering::SeqCst), 0);
        assert_eq!(calls.assess.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn analysis_failure_skips_compliance() {
        let (checker, calls) = checker(Some(Step::AnalyzeRepo));
        let state = checker
            .check_repository("https://github.com/octo/demo", "main")
            .await;

        assert_eq!(state.status, Status::Error);
        assert!(state.error.starts_with("Error analyzing repository: model unavailable"));
        assert!(state.repo_path.is_some());
        assert!(state.repo_analysis.is_none());
        assert_eq!(state.messages.len(), 2);
        assert_eq!(calls.assess.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn compliance_failure_keeps_repository_analysis() {
        let (checker, _) = checker(Some(Step::AnalyzeCompliance));
        let state = checker
            .check_repository("https://github.com/octo/demo", "main")
            .await;

        assert_eq!(state.status, Status::Error);
        assert_eq!(state.error, "Error analyzing compliance: index missing");
        assert!(state.repo_analysis.is_some());
        assert!(state.compliance_analysis.is_none());
    }

    #[test]
    fn state_serialises_snake_case_steps() {
        let json = serde_json::to_value(WorkflowState::new("u", "main")).unwrap();
        assert_eq!(json["current_step"], "download_repo");
        assert_eq!(json["status"], "starting");
        assert_eq!(json["error"], "");
    }
}
