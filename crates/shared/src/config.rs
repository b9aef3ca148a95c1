use std::time::Duration;

use thiserror::Error;

use crate::config_env::{
    optional_trimmed_env, parse_list_env, parse_u32_env, parse_u64_env, parse_usize_env,
    require_env,
};
use crate::conversation::DEFAULT_HISTORY_LIMIT;
use crate::llm::{ProviderRanking, RemoteModelBudget};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_CACHE_BACKEND_TIMEOUT: Duration = Duration::from_millis(250);
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "tablechat:v1";
pub const DEFAULT_RESERVED_SUBDOMAINS: &[&str] = &["www", "app", "api"];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub conversation: ConversationConfig,
    pub tenancy: TenancyConfig,
    pub remote_models: ProviderRanking,
    pub remote_budget: RemoteModelBudget,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
    pub ttl: Duration,
    pub backend_timeout: Duration,
    pub key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub history_limit: usize,
    pub session_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct TenancyConfig {
    pub default_slug: Option<String>,
    pub reserved_subdomains: Vec<String>,
    pub directory_refresh: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl AppConfig {
    /// Reads the whole runtime configuration once. A `.env` file in the working
    /// directory is loaded first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let bind_addr = match optional_trimmed_env("API_BIND_ADDR") {
            Some(addr) => addr,
            None => {
                let port = parse_u32_env("PORT", 8080)?;
                format!("0.0.0.0:{port}")
            }
        };

        let history_limit =
            parse_usize_env("CONVERSATION_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?;
        if history_limit == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "CONVERSATION_HISTORY_LIMIT must be greater than 0".to_string(),
            ));
        }

        let cache_ttl_seconds = parse_u64_env("CACHE_TTL_SECONDS", DEFAULT_CACHE_TTL.as_secs())?;
        if cache_ttl_seconds == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "CACHE_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            database: DatabaseConfig {
                url: require_env("DATABASE_URL")?,
                max_connections: parse_u32_env("DATABASE_MAX_CONNECTIONS", 20)?,
                min_connections: parse_u32_env("DATABASE_MIN_CONNECTIONS", 5)?,
                acquire_timeout: Duration::from_millis(parse_u64_env(
                    "DATABASE_ACQUIRE_TIMEOUT_MS",
                    3000,
                )?),
            },
            cache: CacheConfig {
                redis_url: optional_trimmed_env("REDIS_URL"),
                ttl: Duration::from_secs(cache_ttl_seconds),
                backend_timeout: Duration::from_millis(parse_u64_env(
                    "CACHE_BACKEND_TIMEOUT_MS",
                    DEFAULT_CACHE_BACKEND_TIMEOUT.as_millis() as u64,
                )?),
                key_prefix: optional_trimmed_env("CACHE_KEY_PREFIX")
                    .unwrap_or_else(|| DEFAULT_CACHE_KEY_PREFIX.to_string()),
            },
            conversation: ConversationConfig {
                history_limit,
                session_ttl: Duration::from_secs(parse_u64_env(
                    "CONVERSATION_SESSION_TTL_SECONDS",
                    3600,
                )?),
            },
            tenancy: TenancyConfig {
                default_slug: optional_trimmed_env("DEFAULT_TENANT_SLUG")
                    .map(|slug| slug.to_ascii_lowercase()),
                reserved_subdomains: parse_list_env(
                    "RESERVED_SUBDOMAINS",
                    DEFAULT_RESERVED_SUBDOMAINS,
                ),
                directory_refresh: Duration::from_secs(
                    parse_u64_env("TENANT_DIRECTORY_REFRESH_SECONDS", 300)?.max(1),
                ),
            },
            remote_models: ProviderRanking::from_env()?,
            remote_budget: RemoteModelBudget::from_env()?,
        })
    }
}
