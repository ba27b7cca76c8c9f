//! Configuration management for comet
//!
//! Stores settings in ~/.config/comet/config.json. The API key lives in the
//! system keychain (or the OPENROUTER_API_KEY environment variable); the
//! config file never holds it in plaintext.

use crate::generate::models::DEFAULT_MODEL;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const KEYRING_SERVICE: &str = "comet";
const KEYRING_USERNAME: &str = "openrouter_api_key";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Primary model identifier; `None` means the built-in default. Loaded
    /// once at startup and held by the generator for the process lifetime.
    pub model: Option<String>,
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

fn read_keyring_key() -> Result<Option<String>, keyring::Error> {
    let entry = keyring_entry()?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err),
    }
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("comet"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default. A corrupt file is preserved
    /// next to the original so nothing is silently lost.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        eprintln!(
                            "  Warning: config file was corrupted ({}). A backup was saved and defaults were loaded.",
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
        fs::create_dir_all(&dir)?;
        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// The primary model identifier.
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Get the OpenRouter API key (environment variable takes precedence
    /// over the system keychain).
    pub fn get_api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            return Some(key);
        }
        match read_keyring_key() {
            Ok(key) => key,
            Err(err) => {
                eprintln!(
                    "  Warning: failed to read API key from system keychain: {}",
                    err
                );
                eprintln!("  Tip: set the OPENROUTER_API_KEY environment variable as a workaround.");
                None
            }
        }
    }

    /// Store the API key in the system keychain, verifying the write.
    pub fn set_api_key(&self, key: &str) -> anyhow::Result<()> {
        let entry = keyring_entry()?;
        entry.set_password(key)?;
        match read_keyring_key()? {
            Some(stored) if stored == key => Ok(()),
            _ => Err(anyhow::anyhow!(
                "API key verification failed: key was not persisted to keychain. \
                 You can set the OPENROUTER_API_KEY environment variable instead."
            )),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.get_api_key().is_some()
    }

    /// OpenRouter keys start with sk-.
    pub fn validate_api_key_format(key: &str) -> bool {
        key.starts_with("sk-")
    }

    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/comet/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &std::path::Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
