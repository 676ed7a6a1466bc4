mod azure;
mod hashing;
mod json;
mod openai;
mod wire;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::settings::{GuardSettings, ProviderKind};

pub use azure::AzureOpenAiClient;
pub use hashing::HashingEmbeddings;
pub use json::parse_model_json;
pub use openai::OpenAiClient;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// A single chat completion call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response where supported.
    pub json_response: bool,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: system.into(),
                },
                ChatMessage {
                    role: Role::User,
                    content: user.into(),
                },
            ],
            temperature: 0.2,
            max_tokens: None,
            json_response: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.json_response = true;
        self
    }

    /// Concatenated user content; handy for logging and test doubles.
    pub fn user_prompt(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Client abstraction over chat-completion backends.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Return the assistant's text for the given conversation.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Client abstraction over text-embedding backends.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed every input text; the output has one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Identifier persisted alongside vectors so stale indexes can be detected.
    fn model_id(&self) -> &str;
}

/// Offline chat model that answers every request with the same text.
#[derive(Debug, Clone)]
pub struct NoopChatModel {
    reply: String,
}

impl NoopChatModel {
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl Default for NoopChatModel {
    fn default() -> Self {
        Self::with_reply("LLM provider not configured; no model analysis was performed.")
    }
}

#[async_trait]
impl ChatModel for NoopChatModel {
    async fn complete(&self, _request: &ChatRequest) -> Result<String> {
        Ok(self.reply.clone())
    }

    fn model_name(&self) -> &str {
        "noop"
    }
}

pub fn build_chat_model(settings: &GuardSettings) -> Result<Arc<dyn ChatModel>> {
    Ok(match settings.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiClient::new(settings)?),
        ProviderKind::Azure => Arc::new(AzureOpenAiClient::new(settings)?),
        ProviderKind::Noop => Arc::new(NoopChatModel::default()),
    })
}

pub fn build_embedding_model(settings: &GuardSettings) -> Result<Arc<dyn EmbeddingModel>> {
    Ok(match settings.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiClient::new(settings)?),
        ProviderKind::Azure => Arc::new(AzureOpenAiClient::new(settings)?),
        ProviderKind::Noop => Arc::new(HashingEmbeddings::default()),
    })
}

/// Cut `input` to at most `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "…"
}
