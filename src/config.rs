//! Configuration loading and validation.

use crate::error::{ConfigError, Result};

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_DATA_DIR: &str = "ai_config";
const DEFAULT_PREFIX: &str = "z!";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// chatrelay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the registry and history files.
    pub data_dir: PathBuf,

    /// When set, logs are also written to daily rolling files here.
    pub log_dir: Option<PathBuf>,

    /// Discord connection and command settings.
    pub discord: DiscordConfig,

    /// Model provider configuration.
    pub llm: LlmConfig,
}

/// Discord connection and command settings.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// Bot token.
    pub token: String,

    /// Prefix for text commands.
    pub prefix: String,

    /// User ids allowed to run module and process commands.
    pub owners: Vec<String>,
}

/// Model provider configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Gemini API key.
    pub api_key: String,

    /// Model name, e.g. `gemini-2.0-flash`.
    pub model: String,

    /// API base URL, without a trailing path.
    pub base_url: String,

    /// Per-request HTTP timeout. Unset means model calls may wait
    /// indefinitely.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    data_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    #[serde(default)]
    discord: TomlDiscordConfig,
    #[serde(default)]
    llm: TomlLlmConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlDiscordConfig {
    token: Option<String>,
    prefix: Option<String>,
    #[serde(default)]
    owners: Vec<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlLlmConfig {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from the default locations and the environment.
    ///
    /// Looks for `./config.toml`, then `<config dir>/chatrelay/config.toml`.
    /// Without either file, everything comes from environment variables and
    /// defaults.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from_path(&path),
            None => {
                tracing::debug!("no config file found, using environment only");
                Self::from_toml_str("", "<environment>", env_var)
            }
        }
    }

    /// Load from a specific config file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Load {
            path: path.display().to_string(),
            source: Arc::new(error),
        })?;
        Self::from_toml_str(&content, &path.display().to_string(), env_var)
    }

    /// Parse TOML content, applying overrides from `env`.
    ///
    /// `DISCORD_TOKEN`, `GEMINI_API_KEY` and `CHATRELAY_MODEL` take
    /// precedence over the file.
    pub fn from_toml_str(
        content: &str,
        origin: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let raw: TomlConfig = toml::from_str(content).map_err(|error| ConfigError::Parse {
            path: origin.to_string(),
            message: error.to_string(),
        })?;

        let token = env("DISCORD_TOKEN")
            .or(raw.discord.token)
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingKey("discord.token (or DISCORD_TOKEN)".into()))?;

        let api_key = env("GEMINI_API_KEY")
            .or(raw.llm.api_key)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingKey("llm.api_key (or GEMINI_API_KEY)".into()))?;

        let prefix = raw.discord.prefix.unwrap_or_else(|| DEFAULT_PREFIX.into());
        if prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("discord.prefix must not be empty".into()).into());
        }

        let timeout_secs = raw.llm.timeout_secs;
        if timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("llm.timeout_secs must be positive".into()).into());
        }

        let model = env("CHATRELAY_MODEL")
            .or(raw.llm.model)
            .unwrap_or_else(|| DEFAULT_MODEL.into());

        Ok(Self {
            data_dir: raw
                .data_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            log_dir: raw.log_dir,
            discord: DiscordConfig {
                token,
                prefix,
                owners: raw.discord.owners.iter().map(u64::to_string).collect(),
            },
            llm: LlmConfig {
                api_key,
                model,
                base_url: raw
                    .llm
                    .base_url
                    .unwrap_or_else(|| DEFAULT_BASE_URL.into())
                    .trim_end_matches('/')
                    .to_string(),
                timeout_secs,
            },
        })
    }

    /// Path of the activation registry file.
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("active_channels.json")
    }

    /// Path of the conversation history file.
    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("chatrelay").join("config.toml"))
            .filter(|path| path.exists())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
