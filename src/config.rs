use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use log::debug;

use crate::error::{ChatError, ChatResult};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

const KEY_API_KEY: &str = "apiKey";
const KEY_TEMPERATURE: &str = "temperature";
const KEY_MAX_TOKENS: &str = "maxTokens";

/// Generation parameters plus the API credential
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl Settings {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Build settings from raw stored entries. Missing, empty, zero or
    /// unparsable numbers fall back to the defaults.
    pub fn from_entries(entries: &SettingsEntries) -> Self {
        let temperature = entries
            .get(KEY_TEMPERATURE)
            .and_then(|v| v.trim().parse::<f32>().ok())
            .filter(|t| t.is_finite() && *t != 0.0)
            .unwrap_or(DEFAULT_TEMPERATURE);
        let max_tokens = entries
            .get(KEY_MAX_TOKENS)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        Self {
            api_key: entries.get(KEY_API_KEY).cloned().unwrap_or_default(),
            temperature,
            max_tokens,
        }
    }

    /// Apply the same fallbacks `from_entries` applies to stored values.
    pub fn normalized(self) -> Self {
        Self::from_entries(&self.to_entries())
    }

    pub fn to_entries(&self) -> SettingsEntries {
        let mut entries = SettingsEntries::new();
        entries.insert(KEY_API_KEY.to_string(), self.api_key.clone());
        entries.insert(KEY_TEMPERATURE.to_string(), self.temperature.to_string());
        entries.insert(KEY_MAX_TOKENS.to_string(), self.max_tokens.to_string());
        entries
    }
}

/// Raw string entries as they sit in the store, keyed by name.
pub type SettingsEntries = BTreeMap<String, String>;

/// Durable key/value persistence for settings.
///
/// `save` receives every entry at once so an implementation can write them
/// in a single step.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> ChatResult<SettingsEntries>;
    fn save(&self, entries: &SettingsEntries) -> ChatResult<()>;
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct SettingsFile {
    #[serde(flatten)]
    entries: SettingsEntries,
}

/// JSON file under the user's config directory.
///
/// The API key is stored in cleartext, same trust boundary as a browser
/// profile's local storage.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config_dir>/deepseek-chat/settings.json`
    pub fn default_location() -> ChatResult<Self> {
        Ok(Self::new(app_config_dir()?.join("settings.json")))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> ChatResult<SettingsEntries> {
        if !self.path.exists() {
            return Ok(SettingsEntries::new());
        }

        let content = fs::read_to_string(&self.path)?;
        let file: SettingsFile = serde_json::from_str(&content)?;
        Ok(file.entries)
    }

    fn save(&self, entries: &SettingsEntries) -> ChatResult<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = SettingsFile { entries: entries.clone() };
        let content = serde_json::to_string_pretty(&file)?;

        // Write next to the target and rename, so a crash never leaves half the entries
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        debug!("settings written to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store; clones share the same entries, which lets tests
/// simulate a restart by handing a clone to a fresh controller.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    entries: Arc<Mutex<SettingsEntries>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: SettingsEntries) -> Self {
        Self { entries: Arc::new(Mutex::new(entries)) }
    }

    /// Session-only store: the saved settings from `base` with `api_key`
    /// swapped in. Nothing is ever written back to `base`.
    pub fn overlay_key(base: &dyn SettingsStore, api_key: &str) -> ChatResult<Self> {
        let saved = Settings::from_entries(&base.load()?);
        let settings = Settings { api_key: api_key.trim().to_string(), ..saved };
        Ok(Self::with_entries(settings.to_entries()))
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> SettingsEntries {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> ChatResult<SettingsEntries> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .map_err(|_| ChatError::Storage("settings lock poisoned".to_string()))
    }

    fn save(&self, entries: &SettingsEntries) -> ChatResult<()> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| ChatError::Storage("settings lock poisoned".to_string()))?;
        *guard = entries.clone();
        Ok(())
    }
}

pub fn app_config_dir() -> ChatResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ChatError::Storage("Could not determine config directory".to_string()))?;

    Ok(config_dir.join("deepseek-chat"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> SettingsEntries {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults_when_absent() {
        let settings = Settings::from_entries(&SettingsEntries::new());
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.temperature, 0.7);
        assert_eq!(settings.max_tokens, 1000);
        assert!(!settings.has_api_key());
    }

    #[test]
    fn test_unparsable_numbers_fall_back() {
        let settings = Settings::from_entries(&entries(&[
            ("apiKey", "sk-test"),
            ("temperature", "warm"),
            ("maxTokens", "-5"),
        ]));
        assert_eq!(settings.api_key, "sk-test");
        assert_eq!(settings.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(settings.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_entries_round_trip() {
        let settings = Settings { api_key: "sk-x".into(), temperature: 1.2, max_tokens: 256 };
        assert_eq!(Settings::from_entries(&settings.to_entries()), settings);
    }

    #[test]
    fn test_overlay_key_keeps_saved_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let base = FileSettingsStore::new(dir.path().join("settings.json"));
        base.save(&Settings { api_key: "sk-saved".into(), temperature: 0.3, max_tokens: 64 }.to_entries())
            .unwrap();

        let overlay = MemorySettingsStore::overlay_key(&base, " sk-cli ").unwrap();
        assert_eq!(
            Settings::from_entries(&overlay.load().unwrap()),
            Settings { api_key: "sk-cli".into(), temperature: 0.3, max_tokens: 64 }
        );
        assert_eq!(base.load().unwrap().get("apiKey").map(String::as_str), Some("sk-saved"));
    }

    #[test]
    fn test_overlay_key_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let err = MemorySettingsStore::overlay_key(&FileSettingsStore::new(&path), "sk-cli").unwrap_err();
        assert!(matches!(err, ChatError::Storage(_)));
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path().join("nested/settings.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_persists_string_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.json");
        let store = FileSettingsStore::new(&path);
        store
            .save(&entries(&[("apiKey", "sk-test"), ("temperature", "0.3"), ("maxTokens", "42")]))
            .unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["apiKey"], "sk-test");
        assert_eq!(raw["maxTokens"], "42");
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = FileSettingsStore::new(&path);
        let settings = Settings::from_entries(&reopened.load().unwrap());
        assert_eq!(settings.temperature, 0.3);
        assert_eq!(settings.max_tokens, 42);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        let err = FileSettingsStore::new(&path).load().unwrap_err();
        assert!(matches!(err, ChatError::Storage(_)));
    }

    #[test]
    fn test_memory_store_clones_share_entries() {
        let store = MemorySettingsStore::new();
        let clone = store.clone();
        store.save(&entries(&[("apiKey", "k")])).unwrap();
        assert_eq!(clone.snapshot().get("apiKey").map(String::as_str), Some("k"));
    }
}
