//! TOML-based configuration persistence.
//!
//! Reads and writes [`AppConfig`] from the platform-appropriate config file:
//! - Linux:    `$XDG_CONFIG_HOME/avsync/config.toml` (`~/.config/avsync/...`)
//! - macOS:    `~/Library/Application Support/avsync/config.toml`
//! - Windows:  `%APPDATA%\avsync\config.toml`
//!
//! # Example file
//!
//! ```toml
//! [general]
//! log_level = "debug"
//! default_uri = "denon:192.168.1.40"
//!
//! [connection]
//! reconnect_interval_ms = 5000
//! get_timeout_ms = 2000
//!
//! [discovery]
//! timeout_ms = 3000
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "some_fn")]`, so a missing file, a
//! missing section and a missing key all fall back to the same defaults.
//! Those defaults match [`TargetConfig::default`] and
//! [`DiscoverySettings::default`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::target::TargetConfig;
use crate::infrastructure::network::discovery::DiscoverySettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Target used when a command is given no URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_uri: Option<String>,
}

/// Timing of every target, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_idle_tick_ms")]
    pub idle_tick_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_get_timeout_ms")]
    pub get_timeout_ms: u64,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default = "default_multicast_addr")]
    pub multicast_addr: String,
    #[serde(default = "default_discovery_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_search_target")]
    pub search_target: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_reconnect_interval_ms() -> u64 {
    3000
}
fn default_idle_tick_ms() -> u64 {
    200
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_poll_timeout_ms() -> u64 {
    3000
}
fn default_get_timeout_ms() -> u64 {
    5000
}
fn default_max_line_length() -> usize {
    4096
}
fn default_multicast_addr() -> String {
    "239.255.255.250:1900".to_string()
}
fn default_discovery_timeout_ms() -> u64 {
    2000
}
fn default_search_target() -> String {
    "ssdp:all".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_uri: None,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: default_reconnect_interval_ms(),
            idle_tick_ms: default_idle_tick_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            get_timeout_ms: default_get_timeout_ms(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_addr: default_multicast_addr(),
            timeout_ms: default_discovery_timeout_ms(),
            search_target: default_search_target(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// The runtime parameters for every target.
    pub fn target_config(&self) -> TargetConfig {
        let c = &self.connection;
        TargetConfig {
            reconnect_interval: Duration::from_millis(c.reconnect_interval_ms),
            idle_tick: Duration::from_millis(c.idle_tick_ms.max(1)),
            connect_timeout: Duration::from_millis(c.connect_timeout_ms),
            poll_timeout: Duration::from_millis(c.poll_timeout_ms),
            get_timeout: Duration::from_millis(c.get_timeout_ms),
            max_line_length: c.max_line_length,
        }
    }

    /// Discovery parameters.  An unparsable multicast address falls back to
    /// the SSDP group with a warning.
    pub fn discovery_settings(&self) -> DiscoverySettings {
        let defaults = DiscoverySettings::default();
        let multicast_addr = match self.discovery.multicast_addr.parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(
                    value = %self.discovery.multicast_addr,
                    "invalid discovery.multicast_addr ({e}), using {}",
                    defaults.multicast_addr
                );
                defaults.multicast_addr
            }
        };
        DiscoverySettings {
            multicast_addr,
            timeout: Duration::from_millis(self.discovery.timeout_ms),
            search_target: self.discovery.search_target.clone(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform location, returning defaults if the
/// file does not exist yet.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            debug!(path = %path.display(), "loaded config");
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(AppConfig::default())
        }
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to the platform location.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config directory including the `avsync` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("avsync"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("avsync"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("avsync")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
