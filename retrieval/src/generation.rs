//! Text-generation providers.
//!
//! The query expander asks a [`TextGenerator`] for a structured rewrite of
//! the user's question. [`OpenAIChatGenerator`] talks to any
//! OpenAI-compatible `/chat/completions` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::GenerationError;

/// A single prompt for a generator.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Instructions.
    pub system: String,

    /// The user turn.
    pub user: String,

    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Create a request with deterministic sampling.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.0,
            max_tokens: 300,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A prompt → text service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Complete `request`, returning the reply text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError>;

    /// Check if the provider is usable (API key set, etc.).
    fn is_available(&self) -> bool;
}

/// Generator for OpenAI-compatible chat completion endpoints.
pub struct OpenAIChatGenerator {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
    model: String,
    timeout: Duration,
}

impl OpenAIChatGenerator {
    /// Create a generator reading `OPENAI_API_KEY` from the environment.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for OpenAIChatGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for OpenAIChatGenerator {
    fn name(&self) -> &str {
        "openai-chat"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(GenerationError::ProviderNotConfigured)?;

        let body = serde_json::json!({
            "model": self.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
        });

        debug!("Requesting completion from {} with model {}", self.base_url, self.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::ApiRequest {
                status: status.as_u16(),
                message,
            });
        }

        let reply: ChatResponse = response.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| GenerationError::ProviderUnavailable("empty completion".to_string()))
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
