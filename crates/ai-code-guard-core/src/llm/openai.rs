use super::wire::{
    post_with_retry, read_json, Auth, ChatCompletionPayload, ChatCompletionResponse,
    EmbeddingPayload, EmbeddingResponse,
};
use super::{ChatModel, ChatRequest, EmbeddingModel};
use crate::settings::GuardSettings;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    chat_url: String,
    embeddings_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    max_retries: u32,
}

impl OpenAiClient {
    pub fn new(settings: &GuardSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            bail!("OpenAI API key must be provided via OPENAI_API_KEY");
        }
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base = base.trim_end_matches('/');
        let http = Client::builder()
            .user_agent(concat!("ai-code-guard/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            http,
            chat_url: format!("{base}/v1/chat/completions"),
            embeddings_url: format!("{base}/v1/embeddings"),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            embedding_model: settings.embedding_model.clone(),
            max_retries: settings.max_retries,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let payload = ChatCompletionPayload::from_request(Some(&self.model), request);
        let response = post_with_retry(
            &self.http,
            &self.chat_url,
            Auth::Bearer(&self.api_key),
            &payload,
            self.max_retries,
            "OpenAI chat completions",
        )
        .await?;
        let chat: ChatCompletionResponse = read_json(response, "OpenAI chat completions").await?;
        chat.into_content("OpenAI")
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let payload = EmbeddingPayload {
            model: Some(&self.embedding_model),
            input: texts,
        };
        let response = post_with_retry(
            &self.http,
            &self.embeddings_url,
            Auth::Bearer(&self.api_key),
            &payload,
            self.max_retries,
            "OpenAI embeddings",
        )
        .await?;
        let parsed: EmbeddingResponse = read_json(response, "OpenAI embeddings").await?;
        parsed.into_vectors(texts.len(), "OpenAI embeddings")
    }

    fn model_id(&self) -> &str {
        &self.embedding_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ProviderKind;
    use httpmock::prelude::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn base_settings(url: String) -> GuardSettings {
        GuardSettings {
            provider: ProviderKind::OpenAi,
            api_key: "test-key".into(),
            endpoint: Some(url),
            model: "gpt-4o".into(),
            embedding_model: "text-embedding-ada-002".into(),
            api_version: None,
            github_token: None,
            data_dir: PathBuf::from("./data"),
            timeout: Duration::from_secs(5),
            max_retries: 0,
        }
    }

    #[test]
    fn rejects_blank_api_key() {
        let mut settings = base_settings("http://localhost".into());
        settings.api_key = "  ".into();
        let err = OpenAiClient::new(&settings).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn complete_parses_successful_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer test-key");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[{"message":{"content":"hello there"}}]}"#);
        });

        let client = OpenAiClient::new(&base_settings(server.base_url())).unwrap();
        let reply = client
            .complete(&ChatRequest::new("system", "user"))
            .await
            .unwrap();
        assert_eq!(reply, "hello there");
        mock.assert();
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn embed_returns_one_vector_per_input() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"data":[{"index":0,"embedding":[0.1,0.2]},{"index":1,"embedding":[0.3,0.4]}]}"#);
        });

        let client = OpenAiClient::new(&base_settings(server.base_url())).unwrap();
        let vectors = client
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![0.3, 0.4]);
        mock.assert();
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn retries_on_failure() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(500);
        });

        let mut settings = base_settings(server.base_url());
        settings.max_retries = 1;
        let client = OpenAiClient::new(&settings).unwrap();
        let err = client
            .complete(&ChatRequest::new("system", "user"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("OpenAI chat completions API error"));
        mock.assert_hits(2);
    }
}
