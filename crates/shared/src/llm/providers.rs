use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use url::Url;

use super::gateway::LlmGateway;
use super::openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleGateway};
use crate::config::ConfigError;
use crate::config_env::{optional_trimmed_env, parse_f32_env, parse_u32_env, parse_u64_env};

pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 80;
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(4);
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Groq,
}

impl ProviderKind {
    /// Selection priority, highest first.
    pub const RANKED: [Self; 2] = [Self::OpenAi, Self::Groq];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Groq => "groq",
        }
    }

    const fn env_prefix(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI",
            Self::Groq => "GROQ",
        }
    }

    const fn default_chat_completions_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
            Self::Groq => "https://api.groq.com/openai/v1/chat/completions",
        }
    }

    const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-3.5-turbo",
            Self::Groq => "llama3-70b-8192",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RemoteProvider {
    pub kind: ProviderKind,
    pub chat_completions_url: String,
    pub api_key: String,
    pub model: String,
}

impl RemoteProvider {
    fn from_env(kind: ProviderKind) -> Result<Option<Self>, ConfigError> {
        let prefix = kind.env_prefix();
        let Some(api_key) = optional_trimmed_env(&format!("{prefix}_API_KEY")) else {
            return Ok(None);
        };

        let url_key = format!("{prefix}_CHAT_COMPLETIONS_URL");
        let chat_completions_url = optional_trimmed_env(&url_key)
            .unwrap_or_else(|| kind.default_chat_completions_url().to_string());
        validate_http_url(&url_key, &chat_completions_url)?;

        Ok(Some(Self {
            kind,
            chat_completions_url,
            api_key,
            model: optional_trimmed_env(&format!("{prefix}_MODEL"))
                .unwrap_or_else(|| kind.default_model().to_string()),
        }))
    }
}

impl fmt::Debug for RemoteProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteProvider")
            .field("kind", &self.kind)
            .field("chat_completions_url", &self.chat_completions_url)
            .field("api_key", &mask_secret(&self.api_key))
            .field("model", &self.model)
            .finish()
    }
}

/// Remote models in priority order, evaluated once at startup. An empty
/// ranking means every chat request is answered by the fallback responder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRanking {
    providers: Vec<RemoteProvider>,
}

impl ProviderRanking {
    pub fn new(mut providers: Vec<RemoteProvider>) -> Self {
        providers.sort_by_key(|provider| {
            ProviderKind::RANKED
                .iter()
                .position(|kind| *kind == provider.kind)
                .unwrap_or(usize::MAX)
        });
        Self { providers }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut providers = Vec::new();
        for kind in ProviderKind::RANKED {
            if let Some(provider) = RemoteProvider::from_env(kind)? {
                providers.push(provider);
            }
        }
        Ok(Self::new(providers))
    }

    pub fn select(&self) -> Option<&RemoteProvider> {
        self.providers.first()
    }

    /// Builds the gateway for the highest-ranked provider, or `None` when no
    /// credential is configured.
    pub fn build_gateway(
        &self,
        budget: &RemoteModelBudget,
    ) -> Result<Option<Arc<dyn LlmGateway>>, ConfigError> {
        let Some(provider) = self.select() else {
            info!("no remote model credential configured; using fallback responder only");
            return Ok(None);
        };

        info!(
            provider = provider.kind.as_str(),
            model = %provider.model,
            api_key = %mask_secret(&provider.api_key),
            timeout_ms = budget.timeout.as_millis() as u64,
            max_output_tokens = budget.max_output_tokens,
            "remote model selected"
        );

        let gateway = OpenAiCompatibleGateway::new(OpenAiCompatibleConfig {
            provider: provider.kind,
            chat_completions_url: provider.chat_completions_url.clone(),
            api_key: provider.api_key.clone(),
            model: provider.model.clone(),
            timeout: budget.timeout,
        })?;
        Ok(Some(Arc::new(gateway)))
    }
}

/// Per-call limits applied to every remote-model request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteModelBudget {
    pub timeout: Duration,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for RemoteModelBudget {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REMOTE_TIMEOUT,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl RemoteModelBudget {
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeout_ms = parse_u64_env("LLM_TIMEOUT_MS", DEFAULT_REMOTE_TIMEOUT.as_millis() as u64)?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "LLM_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        let max_output_tokens = parse_u32_env("LLM_MAX_OUTPUT_TOKENS", DEFAULT_MAX_OUTPUT_TOKENS)?;
        if max_output_tokens == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "LLM_MAX_OUTPUT_TOKENS must be greater than 0".to_string(),
            ));
        }

        let temperature = parse_f32_env("LLM_TEMPERATURE", DEFAULT_TEMPERATURE)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidConfiguration(
                "LLM_TEMPERATURE must be between 0 and 2".to_string(),
            ));
        }

        Ok(Self {
            timeout: Duration::from_millis(timeout_ms),
            max_output_tokens,
            temperature,
        })
    }
}

/// Keeps the first and last four characters of a credential.
pub fn mask_secret(secret: &str) -> String {
    let chars = secret.chars().collect::<Vec<_>>();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head = chars[..4].iter().collect::<String>();
    let tail = chars[chars.len() - 4..].iter().collect::<String>();
    format!("{head}…{tail}")
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(value)
        .map_err(|err| ConfigError::InvalidConfiguration(format!("{key} is not a valid url: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidConfiguration(format!(
            "{key} must start with http:// or https://"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ProviderKind, ProviderRanking, RemoteProvider, mask_secret, validate_http_url};

    fn provider(kind: ProviderKind) -> RemoteProvider {
        RemoteProvider {
            kind,
            chat_completions_url: "http://127.0.0.1:9/chat/completions".to_string(),
            api_key: "sk-test-1234567890".to_string(),
            model: "model".to_string(),
        }
    }

    #[test]
    fn openai_outranks_groq_regardless_of_insertion_order() {
        let ranking = ProviderRanking::new(vec![
            provider(ProviderKind::Groq),
            provider(ProviderKind::OpenAi),
        ]);
        assert_eq!(
            ranking.select().map(|provider| provider.kind),
            Some(ProviderKind::OpenAi)
        );

        let groq_only = ProviderRanking::new(vec![provider(ProviderKind::Groq)]);
        assert_eq!(
            groq_only.select().map(|provider| provider.kind),
            Some(ProviderKind::Groq)
        );

        assert!(ProviderRanking::default().select().is_none());
    }

    #[test]
    fn debug_output_masks_api_key() {
        let rendered = format!("{:?}", provider(ProviderKind::OpenAi));
        assert!(!rendered.contains("sk-test-1234567890"));
        assert!(rendered.contains("sk-t…7890"));
    }

    #[test]
    fn short_secrets_are_fully_masked() {
        assert_eq!(mask_secret("abc"), "****");
    }

    #[test]
    fn provider_urls_must_be_http() {
        assert!(validate_http_url("K", "https://api.openai.com/v1/chat/completions").is_ok());
        assert!(validate_http_url("K", "ftp://example.com").is_err());
        assert!(validate_http_url("K", "not a url").is_err());
    }
}
