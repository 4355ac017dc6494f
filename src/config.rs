//! Configuration loading and persistence.
//!
//! Reads `config.json` from the electrum-watch config directory, then
//! applies `ELECTRUM_WATCH_*` environment overrides. Command-line flags are
//! applied on top by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::stratum::ClientConfig;

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE: &str = "config.json";

/// Configuration for the electrum-watch client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Electrum server host.
    pub host: String,
    /// Electrum server TCP port.
    pub port: u16,
    /// Client name sent in `server.version`.
    pub client_name: String,
    /// Protocol version sent in `server.version`.
    pub protocol_version: String,
    /// Seconds between keepalive pings.
    pub keepalive_interval_secs: u64,
    /// Seconds to wait for a response before giving up. Unset waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
    /// Unclaimed responses kept for late waiters.
    pub replay_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            host: "testnetnode.arihanc.com".to_string(),
            port: 51001,
            client_name: client.client_name,
            protocol_version: client.protocol_version,
            keepalive_interval_secs: client.keepalive_interval.as_secs(),
            call_timeout_secs: None,
            replay_capacity: client.replay_capacity,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `ELECTRUM_WATCH_CONFIG_DIR` wins; otherwise the platform config dir
    /// (e.g. `~/.config/electrum-watch` on Linux).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("ELECTRUM_WATCH_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("electrum-watch")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file means defaults. A file that exists but cannot be
    /// parsed is an error.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_dir()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `config.json` from `dir` without environment overrides.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content =
            fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `ELECTRUM_WATCH_*` overrides looked up through `lookup`.
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("ELECTRUM_WATCH_HOST") {
            self.host = host;
        }

        if let Some(port) = lookup("ELECTRUM_WATCH_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => log::warn!("Ignoring invalid ELECTRUM_WATCH_PORT={}", port),
            }
        }

        if let Some(secs) = lookup("ELECTRUM_WATCH_KEEPALIVE_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) if secs > 0 => self.keepalive_interval_secs = secs,
                _ => log::warn!("Ignoring invalid ELECTRUM_WATCH_KEEPALIVE_SECS={}", secs),
            }
        }

        if let Some(secs) = lookup("ELECTRUM_WATCH_CALL_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                // 0 switches the timeout off again.
                Ok(0) => self.call_timeout_secs = None,
                Ok(secs) => self.call_timeout_secs = Some(secs),
                Err(_) => log::warn!("Ignoring invalid ELECTRUM_WATCH_CALL_TIMEOUT_SECS={}", secs),
            }
        }
    }

    /// Persists the current configuration to the config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Persists the current configuration to `dir`.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Connection settings for [`crate::stratum::StratumClient`].
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs.max(1)),
            client_name: self.client_name.clone(),
            protocol_version: self.protocol_version.clone(),
            call_timeout: self.call_timeout_secs.map(Duration::from_secs),
            replay_capacity: self.replay_capacity,
        }
    }
}
