//! Top-level error types for chatrelay.

use std::path::PathBuf;
use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),
}

/// Persistence errors for the registry and history files.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt store file {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize store for {}: {source}", path.display())]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// LLM provider and model errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("missing API key for provider: {0}")]
    MissingProviderKey(String),

    #[error("provider request failed: {0}")]
    ProviderRequest(String),

    #[error("model returned no text: {0}")]
    EmptyResponse(String),

    #[error("failed to fetch attachment {filename}: {reason}")]
    Attachment { filename: String, reason: String },
}

/// Messaging adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("{adapter} adapter is not connected")]
    NotConnected { adapter: String },

    #[error("missing {key} in message metadata")]
    MissingMetadata { key: String },

    #[error("failed to send message: {0}")]
    SendFailed(String),
}

/// Administrative command errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("module {0} is already loaded")]
    AlreadyLoaded(String),

    #[error("module {0} is not loaded")]
    NotLoaded(String),

    #[error("missing argument: {0}")]
    MissingArgument(String),

    #[error("invalid channel reference: {0}")]
    InvalidChannel(String),
}
