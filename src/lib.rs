//! chatrelay: a Discord bot that relays channel messages to a language model.

pub mod commands;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod messaging;
pub mod modules;
pub mod relay;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inbound message from the messaging platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub source: String,
    pub channel_id: String,
    pub sender_id: String,
    pub sender_is_bot: bool,
    pub content: MessageContent,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    /// The text portion of the message, empty for attachment-only messages.
    pub fn text(&self) -> &str {
        match &self.content {
            MessageContent::Text(text) => text,
            MessageContent::Media { text, .. } => text.as_deref().unwrap_or(""),
        }
    }

    pub fn attachments(&self) -> &[Attachment] {
        match &self.content {
            MessageContent::Text(_) => &[],
            MessageContent::Media { attachments, .. } => attachments,
        }
    }
}

/// Message content variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageContent {
    Text(String),
    Media {
        text: Option<String>,
        attachments: Vec<Attachment>,
    },
}

/// File attachment metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub url: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Outbound response to the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundResponse {
    /// Plain message in the source channel.
    Text(String),
    /// Reply referencing the triggering message.
    Reply(String),
    /// Visible only to the invoking user. Falls back to `Text` where the
    /// platform has no ephemeral concept (plain channel messages).
    Ephemeral(String),
    Embed(Embed),
}

/// Rich card with titled fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}
