use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type LlmGatewayFuture<'a> =
    Pin<Box<dyn Future<Output = Result<LlmGatewayResponse, LlmGatewayError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Chat-style completion request: one system instruction followed by the
/// session history and the new user message, oldest first.
#[derive(Debug, Clone)]
pub struct LlmGatewayRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmTokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmGatewayResponse {
    pub model: String,
    pub provider_request_id: Option<String>,
    pub content: String,
    pub usage: Option<LlmTokenUsage>,
}

#[derive(Debug, Error)]
pub enum LlmGatewayError {
    #[error("llm provider request timed out")]
    Timeout,
    #[error("llm provider request failed: {0}")]
    ProviderFailure(String),
    #[error("llm provider returned an invalid payload: {0}")]
    InvalidProviderPayload(String),
}

impl LlmGatewayError {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ProviderFailure(_) => "provider_failure",
            Self::InvalidProviderPayload(_) => "invalid_provider_payload",
        }
    }
}

pub trait LlmGateway: Send + Sync {
    /// Stable provider label used in logs and readiness output.
    fn provider(&self) -> &'static str;
    fn generate<'a>(&'a self, request: LlmGatewayRequest) -> LlmGatewayFuture<'a>;
}
