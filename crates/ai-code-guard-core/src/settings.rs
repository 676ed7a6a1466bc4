use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_AZURE_EMBEDDING_DEPLOYMENT: &str = "text-embedding-ada-002";
const DEFAULT_AZURE_API_VERSION: &str = "2025-01-01-preview";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Which backend answers chat and embedding requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Azure,
    Noop,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "azure" | "azure-openai" => Ok(Self::Azure),
            "noop" | "offline" => Ok(Self::Noop),
            other => bail!("unknown provider `{other}` (expected openai, azure or noop)"),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Noop => "noop",
        };
        f.write_str(label)
    }
}

/// Optional `[llm]` section of a config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmFileSection {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub embedding_model: Option<String>,
    pub endpoint: Option<String>,
    pub api_version: Option<String>,
    pub deployment: Option<String>,
    pub embedding_deployment: Option<String>,
    pub timeout: Option<String>,
    pub max_retries: Option<u32>,
}

/// Values read from a TOML/YAML/JSON config file. Environment variables win over these.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileSettings {
    #[serde(default)]
    pub llm: LlmFileSection,
    pub data_dir: Option<PathBuf>,
}

impl FileSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        cfg.try_deserialize()
            .with_context(|| format!("invalid settings in config file {}", path.display()))
    }
}

/// Runtime configuration shared by every pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardSettings {
    pub provider: ProviderKind,
    pub api_key: String,
    pub endpoint: Option<String>,
    /// Chat model name, or the Azure deployment name.
    pub model: String,
    /// Embedding model name, or the Azure embeddings deployment name.
    pub embedding_model: String,
    pub api_version: Option<String>,
    pub github_token: Option<String>,
    pub data_dir: PathBuf,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl GuardSettings {
    pub const PROVIDER_ENV: &'static str = "AI_CODE_GUARD_PROVIDER";
    pub const USE_AZURE_ENV: &'static str = "USE_AZURE";
    pub const OPENAI_KEY_ENV: &'static str = "OPENAI_API_KEY";
    pub const OPENAI_BASE_URL_ENV: &'static str = "OPENAI_BASE_URL";
    pub const MODEL_ENV: &'static str = "MODEL_NAME";
    pub const EMBEDDING_MODEL_ENV: &'static str = "EMBEDDING_MODEL";
    pub const AZURE_ENDPOINT_ENV: &'static str = "AZURE_OPENAI_ENDPOINT";
    pub const AZURE_KEY_ENV: &'static str = "AZURE_OPENAI_API_KEY";
    pub const AZURE_API_VERSION_ENV: &'static str = "AZURE_OPENAI_API_VERSION";
    pub const AZURE_DEPLOYMENT_ENV: &'static str = "AZURE_OPENAI_DEPLOYMENT";
    pub const AZURE_EMBEDDINGS_DEPLOYMENT_ENV: &'static str = "AZURE_OPENAI_EMBEDDINGS_DEPLOYMENT";
    pub const GITHUB_TOKEN_ENV: &'static str = "GITHUB_TOKEN";
    pub const DATA_DIR_ENV: &'static str = "AI_CODE_GUARD_DATA_DIR";
    pub const TIMEOUT_ENV: &'static str = "AI_CODE_GUARD_TIMEOUT";
    pub const RETRIES_ENV: &'static str = "AI_CODE_GUARD_MAX_RETRIES";

    /// Load settings from the process environment, layered over an optional config file.
    ///
    /// * `OPENAI_API_KEY`: required for the `openai` provider.
    /// * `USE_AZURE=true` or `AI_CODE_GUARD_PROVIDER=azure`: switch to Azure OpenAI.
    /// * `GITHUB_TOKEN`: optional, used for private repositories.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file = match config_path {
            Some(path) => FileSettings::load(path)?,
            None => FileSettings::default(),
        };
        Self::resolve(&file, &std::env::vars().collect())
    }

    pub fn from_env() -> Result<Self> {
        Self::resolve(&FileSettings::default(), &std::env::vars().collect())
    }

    /// Merge config-file values with an environment map. Environment entries take precedence.
    pub fn resolve(file: &FileSettings, vars: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider = if let Some(raw) = get(Self::PROVIDER_ENV) {
            ProviderKind::parse(&raw)?
        } else if get(Self::USE_AZURE_ENV).is_some_and(|v| v.eq_ignore_ascii_case("true")) {
            ProviderKind::Azure
        } else if let Some(raw) = file.llm.provider.as_deref() {
            ProviderKind::parse(raw)?
        } else {
            ProviderKind::OpenAi
        };

        let llm = &file.llm;
        let (api_key, endpoint, model, embedding_model, api_version) = match provider {
            ProviderKind::OpenAi => {
                let api_key = get(Self::OPENAI_KEY_ENV).with_context(|| {
                    format!(
                        "environment variable {} must be set for the openai provider",
                        Self::OPENAI_KEY_ENV
                    )
                })?;
                (
                    api_key,
                    get(Self::OPENAI_BASE_URL_ENV).or_else(|| llm.endpoint.clone()),
                    get(Self::MODEL_ENV)
                        .or_else(|| llm.model.clone())
                        .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
                    get(Self::EMBEDDING_MODEL_ENV)
                        .or_else(|| llm.embedding_model.clone())
                        .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
                    None,
                )
            }
            ProviderKind::Azure => {
                let api_key = get(Self::AZURE_KEY_ENV).with_context(|| {
                    format!(
                        "environment variable {} must be set for the azure provider",
                        Self::AZURE_KEY_ENV
                    )
                })?;
                let endpoint = get(Self::AZURE_ENDPOINT_ENV)
                    .or_else(|| llm.endpoint.clone())
                    .with_context(|| {
                        format!(
                            "environment variable {} must be set for the azure provider",
                            Self::AZURE_ENDPOINT_ENV
                        )
                    })?;
                (
                    api_key,
                    Some(endpoint),
                    get(Self::AZURE_DEPLOYMENT_ENV)
                        .or_else(|| llm.deployment.clone())
                        .or_else(|| llm.model.clone())
                        .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
                    get(Self::AZURE_EMBEDDINGS_DEPLOYMENT_ENV)
                        .or_else(|| llm.embedding_deployment.clone())
                        .unwrap_or_else(|| DEFAULT_AZURE_EMBEDDING_DEPLOYMENT.to_string()),
                    Some(
                        get(Self::AZURE_API_VERSION_ENV)
                            .or_else(|| llm.api_version.clone())
                            .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
                    ),
                )
            }
            ProviderKind::Noop => (
                String::new(),
                None,
                llm.model.clone().unwrap_or_else(|| "noop".to_string()),
                crate::llm::HashingEmbeddings::MODEL_ID.to_string(),
                None,
            ),
        };

        let timeout = match get(Self::TIMEOUT_ENV).or_else(|| llm.timeout.clone()) {
            Some(raw) => parse_timeout(&raw)?,
            None => DEFAULT_TIMEOUT,
        };
        let max_retries = match get(Self::RETRIES_ENV) {
            Some(raw) => raw.parse::<u32>().with_context(|| {
                format!("invalid {} value `{raw}`", Self::RETRIES_ENV)
            })?,
            None => llm.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        };
        let data_dir = get(Self::DATA_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| file.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        Ok(Self {
            provider,
            api_key,
            endpoint,
            model,
            embedding_model,
            api_version,
            github_token: get(Self::GITHUB_TOKEN_ENV),
            data_dir,
            timeout,
            max_retries,
        })
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.data_dir.join("repos")
    }

    pub fn vectorstores_dir(&self) -> PathBuf {
        self.data_dir.join("vectorstores")
    }

    pub fn vectorstore_path(&self) -> PathBuf {
        self.vectorstores_dir().join("eu_ai_act.json")
    }

    pub fn ai_act_path(&self) -> PathBuf {
        self.data_dir.join("eu_ai_act.txt")
    }
}

/// Accepts plain seconds (`45`) or a humantime duration (`1m 30s`).
fn parse_timeout(raw: &str) -> Result<Duration> {
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).with_context(|| format!("invalid timeout `{raw}`"))
}
