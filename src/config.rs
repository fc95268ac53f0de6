//! Configuration loading
//!
//! A TOML file is a partial overlay on top of defaults - every field is
//! optional - and environment variables override the file. Secrets (bot
//! tokens, API keys) normally arrive through the environment.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::pipeline::DEFAULT_CONTEXT_MESSAGES;
use crate::Result;

const DEFAULT_PORT: u16 = 8700;
const DEFAULT_DB_PATH: &str = "sellio.db";
const DEFAULT_OPENAI_MODEL: &str = "gpt-5.2-2025-12-11";

/// Resolved gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server port
    pub port: u16,
    /// Path to the `SQLite` database file
    pub db_path: PathBuf,
    /// Public base URL this gateway is reachable at (webhook registration)
    pub public_url: Option<String>,
    /// Responder context window size
    pub context_messages: usize,
    /// OpenAI responder configuration
    pub openai: OpenAiConfig,
    /// Instagram session-relay configuration
    pub relay: RelayConfig,
    /// Waiting-call notification channel configuration
    pub waiting_call: WaitingCallConfig,
}

/// OpenAI responder settings
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: String,
}

/// Instagram relay settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Waiting-call channel settings (notifier bot + channel)
#[derive(Debug, Clone)]
pub struct WaitingCallConfig {
    pub bot_token: Option<String>,
    pub channel_id: Option<String>,
}

impl Config {
    /// Load configuration from an optional TOML file plus the environment
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            None => ConfigFile::default(),
        };

        Ok(Self::resolve(file, |key| {
            std::env::var(key).ok().filter(|v| !v.is_empty())
        }))
    }

    /// Merge file values with environment overrides and defaults
    fn resolve(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let port = env("SELLIO_PORT")
            .and_then(|v| v.parse().ok())
            .or(file.server.port)
            .unwrap_or(DEFAULT_PORT);

        let db_path = env("SELLIO_DB")
            .map(PathBuf::from)
            .or(file.server.db_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        Self {
            port,
            db_path,
            public_url: env("SELLIO_PUBLIC_URL").or(file.server.public_url),
            context_messages: file
                .responder
                .context_messages
                .unwrap_or(DEFAULT_CONTEXT_MESSAGES),
            openai: OpenAiConfig {
                api_key: env("OPENAI_API_KEY").or(file.openai.api_key),
                model: env("OPENAI_MODEL")
                    .or(file.openai.model)
                    .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()),
            },
            relay: RelayConfig {
                url: env("IG_RELAY_URL").or(file.relay.url),
                api_key: env("IG_RELAY_API_KEY").or(file.relay.api_key),
            },
            waiting_call: WaitingCallConfig {
                bot_token: env("TELEGRAM_BOT_TOKEN").or(file.waiting_call.bot_token),
                channel_id: env("TELEGRAM_WAITING_CALL_CHANNEL_ID")
                    .or(file.waiting_call.channel_id),
            },
        }
    }
}

/// Top-level TOML file schema; all fields optional
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerFileConfig,
    #[serde(default)]
    responder: ResponderFileConfig,
    #[serde(default)]
    openai: OpenAiFileConfig,
    #[serde(default)]
    relay: RelayFileConfig,
    #[serde(default)]
    waiting_call: WaitingCallFileConfig,
}

#[derive(Debug, Default, Deserialize)]
struct ServerFileConfig {
    port: Option<u16>,
    db_path: Option<PathBuf>,
    public_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponderFileConfig {
    context_messages: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiFileConfig {
    api_key: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RelayFileConfig {
    url: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WaitingCallFileConfig {
    bot_token: Option<String>,
    channel_id: Option<String>,
}
