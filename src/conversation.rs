//! Conversation state: the activation registry and per-user history.

pub mod history;
pub mod persist;
pub mod registry;

pub use history::HistoryStore;
pub use registry::{ActivationRegistry, DisableOutcome};

use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Model => write!(f, "model"),
        }
    }
}

/// One piece of turn content.
///
/// Text parts serialize as bare JSON strings so history files written by
/// older versions of the bot (`"parts": ["hello"]`) load unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Part {
    Text(String),
    Image(ImageRef),
}

/// Reference to an image the user attached. Only the reference is stored,
/// never the bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRef {
    pub filename: String,
    pub mime_type: String,
    pub url: String,
}

/// A single user or model message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl ConversationTurn {
    /// A user turn carrying the message text and any image references.
    /// Empty text is omitted so image-only messages hold just images.
    pub fn user(text: impl Into<String>, images: Vec<ImageRef>) -> Self {
        let text = text.into();
        let mut parts = Vec::with_capacity(images.len() + 1);
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }
        parts.extend(images.into_iter().map(Part::Image));
        Self {
            role: Role::User,
            parts,
        }
    }

    /// A model turn carrying the generated text.
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                Part::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
