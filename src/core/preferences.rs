use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::platform::{NativePlatform, Platform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    #[default]
    Squash,
    Merge,
}

impl MergeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeStrategy::Squash => "squash",
            MergeStrategy::Merge => "merge",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            MergeStrategy::Squash => MergeStrategy::Merge,
            MergeStrategy::Merge => MergeStrategy::Squash,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
}

/// Small JSON file holding user choices that outlive a single run.
///
/// The path is always supplied by the caller; production wiring passes
/// [`PreferenceStore::default_path`], tests pass a temp dir.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
    prefs: Preferences,
}

impl PreferenceStore {
    pub fn default_path() -> PathBuf {
        NativePlatform::data_dir().join("preferences.json")
    }

    /// Reads the store, falling back to defaults when the file is missing or
    /// unreadable. Never fails: a broken preference file must not block the UI.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let prefs = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable preferences at {}: {}", path.display(), e);
                Preferences::default()
            }),
            Err(e) => {
                debug!("No preferences at {} ({}), using defaults", path.display(), e);
                Preferences::default()
            }
        };
        Self { path, prefs }
    }

    pub fn merge_strategy(&self) -> MergeStrategy {
        self.prefs.merge_strategy
    }

    /// Updates the in-memory value and rewrites the file. The new value is
    /// kept even when persisting fails.
    pub fn set_merge_strategy(&mut self, strategy: MergeStrategy) -> Result<()> {
        self.prefs.merge_strategy = strategy;
        self.persist()
    }

    pub fn toggle_merge_strategy(&mut self) -> Result<MergeStrategy> {
        let next = self.prefs.merge_strategy.toggled();
        self.set_merge_strategy(next)?;
        Ok(next)
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(&self.prefs)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        NativePlatform::restrict_file_permissions(&tmp);
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_defaults_to_squash() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::load(dir.path().join("preferences.json"));
        assert_eq!(store.merge_strategy(), MergeStrategy::Squash);
    }

    #[test]
    fn corrupt_file_defaults_to_squash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        fs::write(&path, "{not json").unwrap();
        let store = PreferenceStore::load(&path);
        assert_eq!(store.merge_strategy(), MergeStrategy::Squash);
    }

    #[test]
    fn strategy_survives_reconstruction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("preferences.json");

        let mut store = PreferenceStore::load(&path);
        assert_eq!(store.toggle_merge_strategy().unwrap(), MergeStrategy::Merge);
        assert_eq!(
            PreferenceStore::load(&path).merge_strategy(),
            MergeStrategy::Merge
        );

        let mut store = PreferenceStore::load(&path);
        store.set_merge_strategy(MergeStrategy::Squash).unwrap();
        assert_eq!(
            PreferenceStore::load(&path).merge_strategy(),
            MergeStrategy::Squash
        );
    }

    #[test]
    fn file_uses_camel_case_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        let mut store = PreferenceStore::load(&path);
        store.set_merge_strategy(MergeStrategy::Merge).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"mergeStrategy": "merge"}));
        assert!(!path.with_extension("json.tmp").exists());
    }
}
