use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ai_code_guard_core::ai_act::AiActHandler;
use ai_code_guard_core::analysis::{AiContentScanner, UsageExtractor, DEFAULT_MAX_FILES};
use ai_code_guard_core::compliance::DEFAULT_SECTIONS;
use ai_code_guard_core::llm::{build_chat_model, build_embedding_model, truncate};
use ai_code_guard_core::report::{render_ai_content_scan, render_usage_report};
use ai_code_guard_core::workflow::DEFAULT_BRANCH;
use ai_code_guard_core::{
    render_report, save_report, ComplianceChecker, ComplianceReport, FileSettings,
    GitHubFetcher, GuardSettings, OutputFormat, RiskClass,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ai-code-guard",
    author,
    version,
    about = "EU AI Act compliance checker for GitHub repositories"
)]
struct Cli {
    /// Config file (TOML, YAML or JSON) with an optional [llm] section
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Directory holding downloaded repositories, the AI Act text and the vector index
    #[arg(long = "data-dir", value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// LLM provider override (openai, azure, noop)
    #[arg(long, value_name = "PROVIDER", global = true)]
    provider: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the data directories and build the EU AI Act index
    Init,
    /// Download the EU AI Act and store it as plain text
    DownloadAct {
        /// Where to write the text (defaults to <data-dir>/eu_ai_act.txt)
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Run the full compliance check against a GitHub repository
    Check {
        /// GitHub repository URL, e.g. https://github.com/owner/repo
        url: String,
        #[arg(long, default_value = DEFAULT_BRANCH)]
        branch: String,
        #[arg(long, value_enum, default_value_t = FormatArg::Human)]
        format: FormatArg,
        /// Write the report to a file instead of stdout
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Maximum number of code files sent to the model
        #[arg(long = "max-files", default_value_t = DEFAULT_MAX_FILES)]
        max_files: usize,
    },
    /// Similarity search over the EU AI Act index
    Search {
        query: String,
        #[arg(short = 'k', default_value_t = DEFAULT_SECTIONS)]
        k: usize,
        /// Emit matches as JSON
        #[arg(long)]
        json: bool,
    },
    /// Download and extract a repository without analysing it
    Fetch {
        url: String,
        #[arg(long, default_value = DEFAULT_BRANCH)]
        branch: String,
    },
    /// Look for AI content in documentation and dependency files of a local tree
    ScanAiContent {
        dir: PathBuf,
        /// Emit results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Extract structured AI use cases from a local tree
    UseCases {
        dir: PathBuf,
        /// Emit results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Human,
    Json,
    Markdown,
    Yaml,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Human => OutputFormat::Human,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Yaml => OutputFormat::Yaml,
        }
    }
}

fn json_or_human(json: bool) -> OutputFormat {
    if json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    debug!(provider = %settings.provider, data_dir = %settings.data_dir.display(), "settings loaded");

    match cli.command {
        Commands::Init => init(&settings).await?,
        Commands::DownloadAct { output } => download_act(&settings, output.as_deref()).await?,
        Commands::Check {
            url,
            branch,
            format,
            output,
            max_files,
        } => {
            let failed =
                check(&settings, &url, &branch, format.into(), output.as_deref(), max_files)
                    .await?;
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Search { query, k, json } => search(&settings, &query, k, json).await?,
        Commands::Fetch { url, branch } => fetch(&settings, &url, &branch).await?,
        Commands::ScanAiContent { dir, json } => {
            let scanner = AiContentScanner::new(build_chat_model(&settings)?)?;
            let scan = scanner
                .scan(&dir)
                .await
                .with_context(|| format!("failed to scan {}", dir.display()))?;
            println!("{}", render_ai_content_scan(&scan, json_or_human(json))?.trim_end());
        }
        Commands::UseCases { dir, json } => {
            let report = UsageExtractor::new(build_chat_model(&settings)?)
                .extract(&dir)
                .await;
            println!("{}", render_usage_report(&report, json_or_human(json))?.trim_end());
            if report.error.is_some() {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

/// Config file, then environment, then command-line flags.
fn load_settings(cli: &Cli) -> Result<GuardSettings> {
    let file = match cli.config.as_deref() {
        Some(path) => FileSettings::load(path)?,
        None => FileSettings::default(),
    };
    let mut vars: HashMap<String, String> = std::env::vars().collect();
    if let Some(provider) = &cli.provider {
        vars.insert(GuardSettings::PROVIDER_ENV.to_string(), provider.clone());
    }
    let settings = GuardSettings::resolve(&file, &vars)?;
    Ok(match &cli.data_dir {
        Some(dir) => settings.with_data_dir(dir),
        None => settings,
    })
}

fn act_handler(settings: &GuardSettings) -> Result<AiActHandler> {
    AiActHandler::new(settings, build_embedding_model(settings)?)
}

async fn init(settings: &GuardSettings) -> Result<()> {
    for dir in [
        settings.data_dir.clone(),
        settings.repos_dir(),
        settings.vectorstores_dir(),
    ] {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let handler = act_handler(settings)?;
    let index = handler.process().await?;
    println!(
        "{} EU AI Act index ready: {} chunk(s), model {}, stored at {}",
        "✓".green(),
        index.len(),
        index.model,
        handler.index_path().display()
    );
    Ok(())
}

async fn download_act(settings: &GuardSettings, output: Option<&Path>) -> Result<()> {
    let handler = act_handler(settings)?;
    let target = output.unwrap_or_else(|| handler.act_path()).to_path_buf();
    handler.download(&target).await?;
    println!("EU AI Act saved to {}", target.display());
    Ok(())
}

/// Returns `true` when the workflow ended in error.
async fn check(
    settings: &GuardSettings,
    url: &str,
    branch: &str,
    format: OutputFormat,
    output: Option<&Path>,
    max_files: usize,
) -> Result<bool> {
    let checker = ComplianceChecker::from_settings(settings)?.with_max_files(max_files);
    let state = checker.check_repository(url, branch).await;
    let report = ComplianceReport::from(&state);

    match output {
        Some(path) => {
            save_report(&report, path, format)?;
            println!("Report written to {}", path.display());
        }
        None => println!("{}", render_report(&report, format)?.trim_end()),
    }

    if let Some(error) = &report.error {
        eprintln!("{} {}", "error:".red().bold(), error);
        return Ok(true);
    }
    if format == OutputFormat::Human || output.is_some() {
        eprintln!("{}", classification_banner(report.classification));
    }
    Ok(false)
}

fn classification_banner(class: RiskClass) -> String {
    let label = format!("Classification: {class}");
    let label = label.as_str();
    match class {
        RiskClass::Prohibited => label.red().bold().to_string(),
        RiskClass::HighRisk => label.yellow().bold().to_string(),
        RiskClass::LimitedRisk | RiskClass::MinimalRisk | RiskClass::NotAiSystem => {
            label.green().to_string()
        }
        RiskClass::Unknown => label.dimmed().to_string(),
    }
}

async fn search(settings: &GuardSettings, query: &str, k: usize, json: bool) -> Result<()> {
    let handler = act_handler(settings)?;
    let sections = handler.search_relevant_sections(query, k).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&sections)?);
        return Ok(());
    }

    println!("{} match(es) for \"{}\"", sections.len(), query);
    for (idx, section) in sections.iter().enumerate() {
        let article = section
            .chunk
            .article
            .as_deref()
            .map(|a| format!(" Article {a}"))
            .unwrap_or_default();
        println!(
            "\n{}{} [score {:.3}]",
            format!("Section {}", idx + 1).as_str().bold(),
            article,
            section.score
        );
        println!("{}", truncate(section.chunk.text.trim(), 600));
    }
    Ok(())
}

async fn fetch(settings: &GuardSettings, url: &str, branch: &str) -> Result<()> {
    let fetcher = GitHubFetcher::new(settings)?;
    let fetched = fetcher.fetch(url, branch).await?;
    println!(
        "Fetched {} (branch: {}): {} file(s) extracted to {}",
        fetched.reference,
        fetched.branch,
        fetched.files_extracted,
        fetched.path.display()
    );
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
