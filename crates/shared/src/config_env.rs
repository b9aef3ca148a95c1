use std::env;

use crate::config::ConfigError;

pub(crate) fn require_env(key: &str) -> Result<String, ConfigError> {
    optional_trimmed_env(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

pub(crate) fn parse_u32_env(key: &str, default: u32) -> Result<u32, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_u64_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_usize_env(key: &str, default: usize) -> Result<usize, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_f32_env(key: &str, default: f32) -> Result<f32, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<f32>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| {
                ConfigError::InvalidConfiguration(format!("{key} must be a finite number"))
            }),
        None => Ok(default),
    }
}

pub(crate) fn parse_list_env(key: &str, default: &[&str]) -> Vec<String> {
    match optional_trimmed_env(key) {
        Some(raw) => parse_csv_list(&raw),
        None => default.iter().map(|item| (*item).to_string()).collect(),
    }
}

pub(crate) fn optional_trimmed_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub(crate) fn parse_csv_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}
