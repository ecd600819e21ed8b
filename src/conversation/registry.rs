//! Activation registry: the set of channels where relay is turned on.

use crate::conversation::persist;
use crate::error::StoreError;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Result of a disable request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableOutcome {
    Disabled,
    /// The channel was not active. Nothing was written.
    NotActive,
}

/// Persisted set of active channel ids.
///
/// On disk this is a JSON object keyed by channel id. Only key presence is
/// meaningful; values are written as `true` and ignored on load.
#[derive(Debug)]
pub struct ActivationRegistry {
    path: PathBuf,
    channels: BTreeSet<String>,
}

impl ActivationRegistry {
    /// Load the registry from `path`. A missing file is an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let raw: BTreeMap<String, serde_json::Value> = persist::load_json(&path)?;
        let channels: BTreeSet<String> = raw.into_keys().collect();

        tracing::info!(
            path = %path.display(),
            active_channels = channels.len(),
            "activation registry loaded"
        );

        Ok(Self { path, channels })
    }

    /// Mark a channel active and persist. Returns `true` if it was not
    /// active before. Enabling an active channel is not an error.
    pub fn enable(&mut self, channel_id: &str) -> Result<bool, StoreError> {
        let inserted = self.channels.insert(channel_id.to_string());

        if let Err(error) = self.save() {
            if inserted {
                self.channels.remove(channel_id);
            }
            return Err(error);
        }

        tracing::info!(
            channel_id,
            inserted,
            active_channels = self.channels.len(),
            "relay enabled"
        );
        Ok(inserted)
    }

    /// Remove a channel and persist.
    pub fn disable(&mut self, channel_id: &str) -> Result<DisableOutcome, StoreError> {
        if !self.channels.remove(channel_id) {
            return Ok(DisableOutcome::NotActive);
        }

        if let Err(error) = self.save() {
            self.channels.insert(channel_id.to_string());
            return Err(error);
        }

        tracing::info!(
            channel_id,
            active_channels = self.channels.len(),
            "relay disabled"
        );
        Ok(DisableOutcome::Disabled)
    }

    pub fn is_active(&self, channel_id: &str) -> bool {
        self.channels.contains(channel_id)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), StoreError> {
        let document: BTreeMap<&str, bool> = self
            .channels
            .iter()
            .map(|channel_id| (channel_id.as_str(), true))
            .collect();
        persist::save_json(&self.path, &document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_in(dir: &tempfile::TempDir) -> ActivationRegistry {
        ActivationRegistry::load(dir.path().join("active_channels.json")).unwrap()
    }

    #[test]
    fn enable_then_disable_toggles_activation() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);

        assert!(registry.enable("100").unwrap());
        assert!(registry.is_active("100"));

        assert_eq!(registry.disable("100").unwrap(), DisableOutcome::Disabled);
        assert!(!registry.is_active("100"));
    }

    #[test]
    fn enable_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);

        assert!(registry.enable("100").unwrap());
        assert!(!registry.enable("100").unwrap());
        assert_eq!(registry.channels.len(), 1);
    }

    #[test]
    fn disable_unknown_channel_reports_not_active_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);
        registry.enable("100").unwrap();
        let before = std::fs::read_to_string(registry.path()).unwrap();

        assert_eq!(registry.disable("200").unwrap(), DisableOutcome::NotActive);

        assert!(registry.is_active("100"));
        assert_eq!(std::fs::read_to_string(registry.path()).unwrap(), before);
    }

    #[test]
    fn registry_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);
        registry.enable("100").unwrap();
        registry.enable("300").unwrap();
        registry.disable("100").unwrap();

        let reloaded = registry_in(&dir);

        assert!(reloaded.is_active("300"));
        assert!(!reloaded.is_active("100"));
        assert_eq!(reloaded.channels.len(), 1);
    }

    #[test]
    fn file_format_maps_channel_ids_to_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);
        registry.enable("100").unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(registry.path()).unwrap()).unwrap();

        assert_eq!(written, serde_json::json!({"100": true}));
    }

    #[test]
    fn placeholder_values_are_ignored_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active_channels.json");
        std::fs::write(&path, r#"{"100": {}, "200": true}"#).unwrap();

        let registry = ActivationRegistry::load(&path).unwrap();

        assert!(registry.is_active("100"));
        assert!(registry.is_active("200"));
    }

    #[test]
    fn corrupt_registry_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active_channels.json");
        std::fs::write(&path, r#"["100"]"#).unwrap();

        let error = ActivationRegistry::load(&path).unwrap_err();

        assert!(matches!(error, StoreError::Corrupt { .. }));
    }

    #[test]
    fn failed_write_rolls_back_enable() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the target path makes the rename fail.
        let path = dir.path().join("active_channels.json");
        std::fs::create_dir(&path).unwrap();
        let mut registry = ActivationRegistry {
            path,
            channels: BTreeSet::new(),
        };

        assert!(registry.enable("100").is_err());
        assert!(!registry.is_active("100"));
    }
}
