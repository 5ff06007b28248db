//! Configuration for the streaming pipeline
//!
//! [`StreamConfig`] gathers the tunables of every stage. It is stored as TOML in
//! the platform configuration directory under `dev.mda-stream`:
//!
//! - **Linux**: `~/.config/dev.mda-stream/stream.toml`
//! - **macOS**: `~/Library/Application Support/dev.mda-stream/stream.toml`
//! - **Windows**: `%APPDATA%\dev.mda-stream\stream.toml`
//!
//! Every field has a default, so a partial file (or none at all) is valid.
//!
//! # Example
//!
//! ```ignore
//! use mda_stream::config::StreamConfig;
//!
//! let mut config = StreamConfig::load_or_default();
//! config.worker.idle_poll_ms = 20;
//! config.save()?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Result, StreamError};
use crate::sequence::DEFAULT_NAME_PREFIX;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for configuration directories
pub const APP_ID: &str = "dev.mda-stream";

/// Configuration filename
pub const CONFIG_FILE: &str = "stream.toml";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Layer name prefix for plans that are not being saved
    #[serde(default = "default_name_prefix")]
    pub default_name_prefix: String,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub display: DisplaySettings,
}

fn default_name_prefix() -> String {
    DEFAULT_NAME_PREFIX.to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_name_prefix: default_name_prefix(),
            store: StoreSettings::default(),
            worker: WorkerSettings::default(),
            display: DisplaySettings::default(),
        }
    }
}

impl StreamConfig {
    /// Load a configuration file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StreamError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            StreamError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load from the default location; a missing file yields defaults
    pub fn load() -> Result<Self> {
        let path = config_path().ok_or_else(|| {
            StreamError::Config("Could not determine config directory".to_string())
        })?;

        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Load configuration, returning defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load stream config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save to a specific path
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StreamError::Config(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| StreamError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| StreamError::Config(format!("Failed to write config: {}", e)))
    }

    /// Save to the default location
    pub fn save(&self) -> Result<()> {
        let path = config_path().ok_or_else(|| {
            StreamError::Config("Could not determine config directory".to_string())
        })?;
        self.save_to(path)
    }
}
