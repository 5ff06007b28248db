//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use mda_stream::config::{StoreSettings, StreamConfig};
use std::path::Path;
use std::time::Duration;

/// How long tests wait for a run to drain
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Config with scratch storage under `root` and fast polling
pub fn test_config(root: &Path) -> StreamConfig {
    let mut config = StreamConfig::default();
    config.store = StoreSettings::in_dir(root);
    config.worker.idle_poll_ms = 5;
    config.display.refresh_interval_ms = 0;
    config.display.surface_timeout_ms = 1000;
    config
}

/// Number of entries directly under `dir`
pub fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
