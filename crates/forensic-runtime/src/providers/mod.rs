//! LLM provider abstractions.
//!
//! A provider is the transport for one model backend: it turns a list of
//! chat messages into response text and classifies every failure as
//! retryable or fatal. Parsing and validating the text is the gateway's job.
//!
//! ## Security
//!
//! API keys are held as [`ApiCredential`] and only exposed when a request
//! header is set.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod credentials;
mod factory;

#[cfg(any(feature = "anthropic", feature = "openai"))]
mod http;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "openai")]
mod openai;

pub use credentials::{ApiCredential, CredentialSource};
pub use factory::{create_provider, Backends};

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicProvider;

#[cfg(feature = "openai")]
pub use openai::OpenAiProvider;

/// Errors from LLM providers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether another attempt may succeed.
    ///
    /// Rate limits, timeouts, connection failures, empty responses,
    /// unreadable bodies and 5xx are transient. Authentication, other 4xx
    /// (bad request, unknown model) and missing configuration are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::ParseError(_)
            | ProviderError::Timeout(_)
            | ProviderError::EmptyResponse => true,
            ProviderError::ApiError { status, .. } => *status >= 500 || *status == 408,
            ProviderError::AuthError(_) | ProviderError::NotConfigured(_) => false,
        }
    }

    /// Server-requested wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 for deterministic)
    pub temperature: f32,

    /// Request timeout
    pub timeout: Duration,

    /// Mark the system prompt cacheable (Anthropic-specific)
    pub prompt_caching: bool,

    /// Ask the backend for a JSON object response where supported
    pub json_mode: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 2048,
            temperature: 0.0,
            timeout: Duration::from_secs(60),
            prompt_caching: true,
            json_mode: true,
        }
    }
}

impl From<&crate::config::BackendConfig> for CompletionConfig {
    fn from(backend: &crate::config::BackendConfig) -> Self {
        Self {
            model: backend.model.clone(),
            max_tokens: backend.max_tokens,
            temperature: backend.temperature,
            timeout: backend.timeout,
            prompt_caching: backend.prompt_caching,
            json_mode: true,
        }
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == "system"
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model used
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,

    /// Tokens read from cache (Anthropic)
    pub cache_read_tokens: u32,

    /// Tokens written to cache (Anthropic)
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Transport for one model backend.
///
/// Implementations hold their connection pool and must be shareable across
/// concurrent cases.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Get provider name for logs.
    fn name(&self) -> &str;

    /// Release pooled connections. The provider rebuilds them on next use.
    async fn shutdown(&self) {}
}
