//! Client configuration for talking to clamd.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::separator::ServerFileSeparator;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3310;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 20_000;

/// Chunk size for INSTREAM uploads. Must stay below clamd's `StreamMaxLength`.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Connection settings for a clamd instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Path convention of the host clamd runs on.
    pub file_separator: ServerFileSeparator,
    pub chunk_size: usize,
}

impl ClientConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Load a TOML config file. Missing keys fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if it
    /// sets a zero chunk size.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("failed to read {}: {e}", path.display()))?;
        Self::from_toml(&content).map_err(|e| eyre::eyre!("failed to parse {}: {e}", path.display()))
    }

    /// # Errors
    ///
    /// Returns an error on malformed TOML or a zero chunk size.
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.chunk_size == 0 {
            return Err(eyre::eyre!("chunk_size must be greater than zero"));
        }
        Ok(config)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            file_separator: ServerFileSeparator::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// `~/.config/clamwire/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".config").join("clamwire").join("config.toml"))
}
