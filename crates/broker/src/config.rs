// Broker configuration.
//
// Global config: `~/.tablecast/config.toml`, with CLI flag overrides in
// `main.rs`. Missing or unparsable files fall back to defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Root directory for Tablecast global state: `~/.tablecast/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".tablecast"))
}

/// Path to the global config file: `~/.tablecast/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Address the websocket/http server binds to.
    pub bind_addr: String,
    /// Root directory database ids and volume files resolve under.
    pub volume_root: PathBuf,
    /// Debounce window for change signals in milliseconds (clamped 50–500).
    pub debounce_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3450".into(),
            volume_root: PathBuf::from("./codegen"),
            debounce_ms: 100,
        }
    }
}

impl BrokerConfig {
    /// Load from `~/.tablecast/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config `{}`", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config `{}`", path.display()))
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory `{}`", parent.display())
            })?;
        }
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write config `{}`", path.display()))
    }
}
