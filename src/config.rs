//! Process configuration, read from the environment (and `.env` when present).

use std::env;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use crate::discord::{ReconnectConfig, API};
use crate::identity::Token;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse intents file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: Token,
    pub intents_file: PathBuf,
    pub api_base: String,
    pub reconnect: ReconnectConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = skip_missing_env_file(dotenvy::dotenv()) {
            warn!(error = %e, "failed to load .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;
        let intents_file = lookup("DISCORD_INTENTS_FILE").unwrap_or_else(|| "intents.toml".into());
        let api_base = lookup("DISCORD_API_BASE").unwrap_or_else(|| API.into());

        let mut reconnect = ReconnectConfig::default();
        if let Some(value) = lookup("GATEWAY_RECONNECT_ATTEMPTS") {
            let attempts: u32 = value.parse().map_err(|_| ConfigError::Invalid {
                key: "GATEWAY_RECONNECT_ATTEMPTS",
                value,
            })?;
            reconnect.max_attempts = (attempts > 0).then_some(attempts);
        }

        Ok(Config {
            token: Token::new(token.trim()),
            intents_file: intents_file.into(),
            api_base,
            reconnect,
        })
    }
}

fn skip_missing_env_file<T>(loaded: Result<T, dotenvy::Error>) -> Result<(), dotenvy::Error> {
    match loaded {
        Err(e) if !e.not_found() => Err(e),
        _ => Ok(()),
    }
}
