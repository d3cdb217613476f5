//! LLM provider client.
//!
//! One narrow trait covers the chat-completion interface; the production
//! implementation talks to an OpenAI-compatible endpoint over HTTP with a
//! hard deadline. Transient transport errors get exactly one jittered retry;
//! malformed model output never retries (the caller's fallback fires
//! instead).

pub mod helpers;

pub use helpers::LlmHelpers;

use crate::types::{Error, LlmConfig, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One chat turn sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat-completion interface: `{model, messages}` in, one string out.
#[async_trait]
pub trait ChatProvider: Send + Sync + fmt::Debug {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

/// HTTP provider for OpenAI-compatible chat-completion endpoints.
#[derive(Debug)]
pub struct HttpChatProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpChatProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
        })
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&CompletionRequest { model, messages });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::llm(format!(
                "provider returned {}",
                response.status()
            )));
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::llm("provider returned no choices"))
    }
}

/// Provider that always fails. Default wiring for offline runs: every helper
/// exercises its deterministic fallback.
#[derive(Debug, Default)]
pub struct NullChatProvider;

#[async_trait]
impl ChatProvider for NullChatProvider {
    async fn complete(&self, _model: &str, _messages: &[ChatMessage]) -> Result<String> {
        Err(Error::service_unavailable("no llm provider configured"))
    }
}

/// Run a completion with one jittered retry for transient transport errors.
/// JSON-parse failures are surfaced immediately (retrying would re-spend the
/// call for the same malformed shape).
pub async fn complete_with_retry(
    provider: &dyn ChatProvider,
    model: &str,
    messages: &[ChatMessage],
    max_retries: u32,
) -> Result<String> {
    let mut attempt = 0;
    loop {
        match provider.complete(model, messages).await {
            Ok(content) => return Ok(content),
            Err(error) if error.is_transient() && attempt < max_retries => {
                attempt += 1;
                let jitter_ms = rand::thread_rng().gen_range(50..250);
                tracing::warn!(
                    attempt,
                    jitter_ms,
                    error = %error,
                    "llm_transport_retry"
                );
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Strip a markdown code fence from model output, if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim_end).unwrap_or(rest)
}
