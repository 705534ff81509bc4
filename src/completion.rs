//! Chat-completion client for an OpenAI-compatible endpoint.
//!
//! [`CompletionClient`] is the seam between answer synthesis and the remote
//! model. [`ChatCompletionsClient`] is the production implementation: a
//! single POST per call, bounded by a per-attempt timeout. It classifies the
//! outcome into a [`CompletionError`] but never retries itself; retry and
//! backoff belong to the caller's [`RetryPolicy`](crate::retry::RetryPolicy).
//!
//! # Response Classification
//!
//! | Outcome | Result |
//! |---------|--------|
//! | HTTP 200 with `choices[0].message.content` | `Ok(text)` |
//! | HTTP 200, body missing that field | [`CompletionError::InvalidResponse`] |
//! | HTTP 429 | [`CompletionError::RateLimited`] (retryable) |
//! | Any other status | [`CompletionError::Upstream`] |
//! | Connect error or timeout | [`CompletionError::Transport`] (retryable) |

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::config::CompletionConfig;
use crate::retry::Retryable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request body sent to the chat-completions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("completion service is rate limiting requests (HTTP 429)")]
    RateLimited,

    #[error("completion service returned HTTP {status}")]
    Upstream { status: u16 },

    #[error("completion request failed: {0}")]
    Transport(String),

    #[error("completion response was malformed: {0}")]
    InvalidResponse(String),
}

impl Retryable for CompletionError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CompletionError::RateLimited | CompletionError::Transport(_)
        )
    }
}

/// Sends a chat request and returns the generated text.
///
/// Implementations make exactly one attempt per call.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

/// reqwest-backed client for `POST {api_url}` with a bearer token.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl ChatCompletionsClient {
    /// Build a client from configuration. The API key is read from the
    /// environment variable named by `api_key_env` at construction time.
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let api_key = config.api_key();
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "no completion API key set; requests will be sent unauthenticated"
            );
        }

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionsClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let mut builder = self.client.post(&self.api_url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CompletionError::RateLimited);
        }
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), body = %truncate(&body, 500), "completion request rejected");
            return Err(CompletionError::Upstream {
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;
        extract_content(&body)
    }
}

/// Pull `choices[0].message.content` out of a chat-completions body.
pub fn extract_content(body: &serde_json::Value) -> Result<String, CompletionError> {
    body.pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            CompletionError::InvalidResponse("missing choices[0].message.content".to_string())
        })
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
