pub mod ai_act;
pub mod analysis;
pub mod compliance;
pub mod github;
pub mod llm;
pub mod report;
pub mod repository;
pub mod settings;
pub mod workflow;

pub use ai_act::{ActChunk, ActIndex, AiActHandler, ScoredSection};
pub use analysis::{
    AiContentScan, AiContentScanner, CodeAnalyzer, FileAnalysis, RepositoryAnalysis,
    UsageExtractor, UsageReport,
};
pub use compliance::{ComplianceAnalysis, ComplianceAnalyzer, RiskClass};
pub use github::{parse_repo_url, FetchedRepo, GitHubFetcher, RepoRef, RepoUrlError};
pub use report::{render_report, save_report, ComplianceReport, OutputFormat};
pub use settings::{FileSettings, GuardSettings, ProviderKind};
pub use workflow::{ComplianceChecker, Status, WorkflowState};
