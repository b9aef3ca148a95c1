use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::gateway::{
    ChatMessage, ChatRole, LlmGateway, LlmGatewayError, LlmGatewayFuture, LlmGatewayRequest,
    LlmGatewayResponse, LlmTokenUsage,
};
use super::providers::ProviderKind;
use crate::config::ConfigError;

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    pub provider: ProviderKind,
    pub chat_completions_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire
/// format. Sends exactly one request per call; a failed call is returned to
/// the caller without retry.
#[derive(Clone)]
pub struct OpenAiCompatibleGateway {
    client: reqwest::Client,
    config: OpenAiCompatibleConfig,
}

impl OpenAiCompatibleGateway {
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| {
                ConfigError::InvalidConfiguration(format!(
                    "failed to build {} http client: {err}",
                    config.provider.as_str()
                ))
            })?;

        Ok(Self { client, config })
    }

    async fn send_once(
        &self,
        request: &LlmGatewayRequest,
    ) -> Result<LlmGatewayResponse, LlmGatewayError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: &request.system_prompt,
        });
        messages.extend(request.messages.iter().map(wire_message));

        let request_body = ChatCompletionsRequest {
            model: &self.config.model,
            messages,
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.config.chat_completions_url)
            .bearer_auth(&self.config.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    LlmGatewayError::Timeout
                } else {
                    LlmGatewayError::ProviderFailure("request_unavailable".to_string())
                }
            })?;

        let status = response.status();
        let header_request_id = header_request_id(response.headers());
        let body = response.text().await.map_err(|err| {
            if err.is_timeout() {
                LlmGatewayError::Timeout
            } else {
                LlmGatewayError::InvalidProviderPayload("response_body_read_failed".to_string())
            }
        })?;

        if !status.is_success() {
            let provider_code = parse_provider_error_code(&body);
            return Err(LlmGatewayError::ProviderFailure(format!(
                "status={} code={provider_code}",
                status.as_u16()
            )));
        }

        let parsed: ChatCompletionsResponse = serde_json::from_str(&body).map_err(|_| {
            LlmGatewayError::InvalidProviderPayload("response_json_parse_failed".to_string())
        })?;

        let content = parsed
            .choices
            .first()
            .ok_or_else(|| LlmGatewayError::InvalidProviderPayload("missing_choice".to_string()))?
            .message
            .content
            .clone();

        let content = match content {
            Value::String(text) if !text.trim().is_empty() => text.trim().to_string(),
            Value::String(_) => {
                return Err(LlmGatewayError::InvalidProviderPayload(
                    "empty_content".to_string(),
                ));
            }
            _ => {
                return Err(LlmGatewayError::InvalidProviderPayload(
                    "unsupported_content_shape".to_string(),
                ));
            }
        };

        Ok(LlmGatewayResponse {
            model: parsed.model.unwrap_or_else(|| self.config.model.clone()),
            provider_request_id: header_request_id.or(parsed.id),
            content,
            usage: parsed.usage.map(|usage| LlmTokenUsage {
                prompt_tokens: clamp_u64_to_u32(usage.prompt_tokens.unwrap_or(0)),
                completion_tokens: clamp_u64_to_u32(usage.completion_tokens.unwrap_or(0)),
                total_tokens: clamp_u64_to_u32(usage.total_tokens.unwrap_or(0)),
            }),
        })
    }
}

impl LlmGateway for OpenAiCompatibleGateway {
    fn provider(&self) -> &'static str {
        self.config.provider.as_str()
    }

    fn generate<'a>(&'a self, request: LlmGatewayRequest) -> LlmGatewayFuture<'a> {
        Box::pin(async move { self.send_once(&request).await })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

fn wire_message(message: &ChatMessage) -> WireMessage<'_> {
    let role = match message.role {
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    };
    WireMessage {
        role,
        content: &message.content,
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<ChatCompletionsChoice>,
    usage: Option<ChatCompletionsUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsChoice {
    message: ChatCompletionsMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsMessage {
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

fn header_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn parse_provider_error_code(body: &str) -> String {
    #[derive(Deserialize)]
    struct ProviderErrorEnvelope {
        error: Option<ProviderErrorDetails>,
    }

    #[derive(Deserialize)]
    struct ProviderErrorDetails {
        code: Option<Value>,
        #[serde(rename = "type")]
        kind: Option<String>,
    }

    let Some(details) = serde_json::from_str::<ProviderErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
    else {
        return "unknown".to_string();
    };

    match details.code {
        Some(Value::String(code)) => code,
        Some(Value::Number(code)) => code.to_string(),
        _ => details.kind.unwrap_or_else(|| "unknown".to_string()),
    }
}

fn clamp_u64_to_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::parse_provider_error_code;

    #[test]
    fn provider_error_code_prefers_code_then_type() {
        assert_eq!(
            parse_provider_error_code(r#"{"error":{"code":"rate_limit_exceeded"}}"#),
            "rate_limit_exceeded"
        );
        assert_eq!(parse_provider_error_code(r#"{"error":{"code":429}}"#), "429");
        assert_eq!(
            parse_provider_error_code(r#"{"error":{"code":null,"type":"server_error"}}"#),
            "server_error"
        );
        assert_eq!(parse_provider_error_code("<html>"), "unknown");
    }
}
