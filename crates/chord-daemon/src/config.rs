//! Configuration loading

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub spec: SpecConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub emulators: EmulatorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the REST and WebSocket server
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:9999".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecConfig {
    /// Device spec file (`.json` or `.toml`)
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Default correlation window in milliseconds
    #[serde(default = "default_time_range_ms")]
    pub time_range_ms: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            time_range_ms: default_time_range_ms(),
        }
    }
}

fn default_time_range_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmulatorsConfig {
    /// Emulated devices to create at startup, by device type
    #[serde(default)]
    pub counts: BTreeMap<String, usize>,
    /// Keep live devices when the emulators are created
    #[serde(default)]
    pub keep_live: bool,
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
