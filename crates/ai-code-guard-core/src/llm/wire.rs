use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use super::{ChatMessage, ChatRequest};

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Clone, Copy)]
pub(super) enum Auth<'a> {
    Bearer(&'a str),
    ApiKeyHeader(&'a str),
}

/// POST `body` as JSON, retrying transport failures and non-2xx statuses with exponential backoff.
pub(super) async fn post_with_retry<B: Serialize + ?Sized>(
    http: &Client,
    url: &str,
    auth: Auth<'_>,
    body: &B,
    max_retries: u32,
    label: &str,
) -> Result<Response> {
    let mut attempt = 0u32;
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let builder = http.post(url).json(body);
        let builder = match auth {
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::ApiKeyHeader(key) => builder.header("api-key", key),
        };

        let response = match builder.send().await {
            Ok(resp) => resp,
            Err(err) => {
                if attempt >= max_retries {
                    return Err(err).with_context(|| format!("failed to call {label} API"));
                }
                tracing::debug!(attempt, error = %err, "{label} request failed; retrying");
                sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                attempt += 1;
                continue;
            }
        };

        if !response.status().is_success() {
            if attempt >= max_retries {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                bail!("{label} API error ({}): {}", status, body);
            }
            tracing::debug!(attempt, status = %response.status(), "{label} returned error status; retrying");
            sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
            attempt += 1;
            continue;
        }

        return Ok(response);
    }
}

#[derive(Serialize)]
pub(super) struct ChatCompletionPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl<'a> ChatCompletionPayload<'a> {
    pub fn from_request(model: Option<&'a str>, request: &'a ChatRequest) -> Self {
        Self {
            model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_response.then(|| ResponseFormat {
                kind: "json_object",
            }),
        }
    }
}

#[derive(Serialize)]
pub(super) struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Deserialize)]
pub(super) struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl ChatCompletionResponse {
    pub fn into_content(self, label: &str) -> Result<String> {
        self.choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("{label} response missing message content"))
    }
}

#[derive(Serialize)]
pub(super) struct EmbeddingPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub input: &'a [String],
}

#[derive(Deserialize)]
pub(super) struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    /// Vectors ordered by their `index` field, checked against the number of inputs.
    pub fn into_vectors(mut self, expected: usize, label: &str) -> Result<Vec<Vec<f32>>> {
        if self.data.len() != expected {
            bail!(
                "{label} returned {} embeddings for {} inputs",
                self.data.len(),
                expected
            );
        }
        self.data.sort_by_key(|item| item.index);
        Ok(self.data.into_iter().map(|item| item.embedding).collect())
    }
}

pub(super) async fn read_json<T: for<'de> Deserialize<'de>>(
    response: Response,
    label: &str,
) -> Result<T> {
    response
        .json()
        .await
        .with_context(|| format!("failed to parse {label} response"))
}
