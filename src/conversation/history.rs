//! Conversation history persistence (JSON file).

use crate::conversation::ConversationTurn;
use crate::conversation::persist;
use crate::error::StoreError;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// channel id -> user id -> turns.
type Histories = BTreeMap<String, BTreeMap<String, Vec<ConversationTurn>>>;

/// Per-channel, per-user conversation history.
///
/// Every exchange is appended and the whole document rewritten. Nothing is
/// ever pruned, so the file grows without bound for busy channels.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    histories: Histories,
}

impl HistoryStore {
    /// Load history from `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let histories: Histories = persist::load_json(&path)?;

        tracing::info!(
            path = %path.display(),
            channels = histories.len(),
            "conversation history loaded"
        );

        Ok(Self { path, histories })
    }

    /// Turns recorded for a user in a channel, oldest first. Empty when
    /// nothing has been recorded; reading never creates an entry.
    pub fn get_history(&self, channel_id: &str, user_id: &str) -> &[ConversationTurn] {
        self.histories
            .get(channel_id)
            .and_then(|users| users.get(user_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Append a user turn and the model's reply, then persist the store.
    ///
    /// If the write fails the two turns are removed again so memory matches
    /// what is on disk.
    pub fn append_exchange(
        &mut self,
        channel_id: &str,
        user_id: &str,
        user_turn: ConversationTurn,
        model_turn: ConversationTurn,
    ) -> Result<(), StoreError> {
        let turns = self
            .histories
            .entry(channel_id.to_string())
            .or_default()
            .entry(user_id.to_string())
            .or_default();
        turns.push(user_turn);
        turns.push(model_turn);

        if let Err(error) = persist::save_json(&self.path, &self.histories) {
            self.rollback_exchange(channel_id, user_id);
            return Err(error);
        }

        tracing::debug!(channel_id, user_id, "exchange appended to history");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rollback_exchange(&mut self, channel_id: &str, user_id: &str) {
        let Some(users) = self.histories.get_mut(channel_id) else {
            return;
        };
        if let Some(turns) = users.get_mut(user_id) {
            let keep = turns.len().saturating_sub(2);
            turns.truncate(keep);
            if turns.is_empty() {
                users.remove(user_id);
            }
        }
        if users.is_empty() {
            self.histories.remove(channel_id);
        }
    }
}
