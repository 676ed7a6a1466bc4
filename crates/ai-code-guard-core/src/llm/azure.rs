use super::wire::{
    post_with_retry, read_json, Auth, ChatCompletionPayload, ChatCompletionResponse,
    EmbeddingPayload, EmbeddingResponse,
};
use super::{ChatModel, ChatRequest, EmbeddingModel};
use crate::settings::GuardSettings;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

const DEFAULT_API_VERSION: &str = "2025-01-01-preview";

#[derive(Debug, Clone)]
pub struct AzureOpenAiClient {
    http: Client,
    chat_url: String,
    embeddings_url: String,
    api_key: String,
    deployment: String,
    embedding_deployment: String,
    max_retries: u32,
}

impl AzureOpenAiClient {
    pub fn new(settings: &GuardSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            bail!("Azure OpenAI API key must be provided via AZURE_OPENAI_API_KEY");
        }
        let endpoint = settings
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow!("AZURE_OPENAI_ENDPOINT must be set for azure provider"))?;
        let endpoint = azure_base_url(endpoint);
        let api_version = settings
            .api_version
            .as_deref()
            .unwrap_or(DEFAULT_API_VERSION);

        let chat_url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint, settings.model, api_version
        );
        let embeddings_url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            endpoint, settings.embedding_model, api_version
        );

        let http = Client::builder()
            .user_agent(concat!("ai-code-guard/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .context("failed to build Azure OpenAI HTTP client")?;

        Ok(Self {
            http,
            chat_url,
            embeddings_url,
            api_key: settings.api_key.clone(),
            deployment: settings.model.clone(),
            embedding_deployment: settings.embedding_model.clone(),
            max_retries: settings.max_retries,
        })
    }
}

/// Azure endpoints are sometimes configured as full deployment URLs; keep only scheme and host.
fn azure_base_url(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    match trimmed.find("://") {
        Some(scheme_end) => {
            let host_start = scheme_end + 3;
            match trimmed[host_start..].find('/') {
                Some(path_start) => trimmed[..host_start + path_start].to_string(),
                None => trimmed.to_string(),
            }
        }
        None => trimmed.to_string(),
    }
}

#[async_trait]
impl ChatModel for AzureOpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let payload = ChatCompletionPayload::from_request(None, request);
        let response = post_with_retry(
            &self.http,
            &self.chat_url,
            Auth::ApiKeyHeader(&self.api_key),
            &payload,
            self.max_retries,
            "Azure OpenAI chat completions",
        )
        .await?;
        let chat: ChatCompletionResponse =
            read_json(response, "Azure OpenAI chat completions").await?;
        chat.into_content("Azure OpenAI")
    }

    fn model_name(&self) -> &str {
        &self.deployment
    }
}

#[async_trait]
impl EmbeddingModel for AzureOpenAiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let payload = EmbeddingPayload {
            model: None,
            input: texts,
        };
        let response = post_with_retry(
            &self.http,
            &self.embeddings_url,
            Auth::ApiKeyHeader(&self.api_key),
            &payload,
            self.max_retries,
            "Azure OpenAI embeddings",
        )
        .await?;
        let parsed: EmbeddingResponse = read_json(response, "Azure OpenAI embeddings").await?;
        parsed.into_vectors(texts.len(), "Azure OpenAI embeddings")
    }

    fn model_id(&self) -> &str {
        &self.embedding_deployment
    }
}
