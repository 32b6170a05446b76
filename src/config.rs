//! Policy configuration for the pty layer.
//!
//! Loaded from `~/.wpty/config.toml` (override the path with the
//! `WPTY_CONFIG` environment variable):
//!
//! ```toml
//! # Per-channel buffer capacity in bytes
//! channel_capacity = 65536
//!
//! # How long a slave open waits for the master's rendezvous acceptor
//! rendezvous_timeout_ms = 500
//!
//! [adapter]
//! # Allow delegating rendering to a host-native console adapter
//! enabled = true
//! ```
//!
//! Setting `WPTY_DISABLE_ADAPTER=1` in the environment disables the
//! console adapter regardless of the file.

use std::env;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Buffer capacity of each byte-stream channel.
    pub channel_capacity: usize,
    /// Timeout for one rendezvous round trip, in milliseconds.
    pub rendezvous_timeout_ms: u64,
    /// Console adapter policy.
    pub adapter: AdapterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_capacity: 64 * 1024,
            rendezvous_timeout_ms: 500,
            adapter: AdapterConfig::default(),
        }
    }
}

/// Console adapter policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub enabled: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from file, then apply environment overrides.
    pub fn load() -> Self {
        let mut config = Self::get_config_path()
            .filter(|path| path.exists())
            .and_then(|path| match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str::<Config>(&content) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        warn!("ignoring malformed config {}: {}", path.display(), e);
                        None
                    }
                },
                Err(_) => None,
            })
            .unwrap_or_default();
        config.apply_env();
        config
    }

    /// Apply environment overrides to an existing configuration.
    pub fn apply_env(&mut self) {
        if let Some(v) = env::var_os("WPTY_DISABLE_ADAPTER") {
            if v != "0" && !v.is_empty() {
                self.adapter.enabled = false;
            }
        }
    }

    fn get_config_path() -> Option<PathBuf> {
        if let Some(path) = env::var_os("WPTY_CONFIG") {
            return Some(PathBuf::from(path));
        }
        let home = env::var_os("HOME")
            .or_else(|| env::var_os("USERPROFILE"))
            .map(PathBuf::from)?;
        Some(home.join(".wpty").join("config.toml"))
    }
}
