//! Tunables for the individual pipeline stages
//!
//! - [`StoreSettings`] - where scratch arrays live
//! - [`WorkerSettings`] - how the background worker waits for frames
//! - [`DisplaySettings`] - how display updates are marshaled and throttled

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default scratch directory prefix
pub const DEFAULT_DIR_PREFIX: &str = "mda-stream-";

/// Default worker idle wait in milliseconds
pub const DEFAULT_IDLE_POLL_MS: u64 = 100;

/// Default minimum interval between display refreshes in milliseconds
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 50;

/// Default number of unread write failures kept
pub const DEFAULT_FAILURE_BACKLOG: usize = 256;

/// Scratch storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Directory under which per-layer scratch directories are created.
    /// `None` uses the system temporary directory.
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,

    /// Prefix of each per-layer scratch directory
    #[serde(default = "default_dir_prefix")]
    pub dir_prefix: String,
}

fn default_dir_prefix() -> String {
    DEFAULT_DIR_PREFIX.to_string()
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            scratch_root: None,
            dir_prefix: default_dir_prefix(),
        }
    }
}

impl StoreSettings {
    /// Scratch settings rooted at `root`
    pub fn in_dir(root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: Some(root.into()),
            ..Default::default()
        }
    }

    /// Resolved scratch root
    pub fn root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Background worker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// How long the worker waits on an empty buffer before re-checking its state
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Unread write failures kept; older ones are dropped first
    #[serde(default = "default_failure_backlog")]
    pub failure_backlog: usize,
}

fn default_idle_poll_ms() -> u64 {
    DEFAULT_IDLE_POLL_MS
}

fn default_failure_backlog() -> usize {
    DEFAULT_FAILURE_BACKLOG
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            idle_poll_ms: DEFAULT_IDLE_POLL_MS,
            failure_backlog: DEFAULT_FAILURE_BACKLOG,
        }
    }
}

impl WorkerSettings {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }
}

/// Display marshaling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// Minimum time between current-index/visibility refreshes
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Capacity of the queue towards the UI thread
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long planning waits for the UI thread to create a surface
    #[serde(default = "default_surface_timeout_ms")]
    pub surface_timeout_ms: u64,
}

fn default_refresh_interval_ms() -> u64 {
    DEFAULT_REFRESH_INTERVAL_MS
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_surface_timeout_ms() -> u64 {
    2000
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            queue_capacity: default_queue_capacity(),
            surface_timeout_ms: default_surface_timeout_ms(),
        }
    }
}

impl DisplaySettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn surface_timeout(&self) -> Duration {
        Duration::from_millis(self.surface_timeout_ms)
    }
}
