//! TOML-based configuration for the client.
//!
//! Read from `client.toml` in the platform config directory:
//! - Linux:    `$XDG_CONFIG_HOME/filerover/client.toml` or `~/.config/filerover/client.toml`
//! - Windows:  `%APPDATA%\FileRover\client.toml`
//! - macOS:    `~/Library/Application Support/FileRover/client.toml`
//!
//! Example:
//!
//! ```toml
//! [client]
//! log_level = "warn"
//!
//! [network]
//! reply_timeout_ms = 10000
//!
//! [discovery]
//! window_ms = 500
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rover_core::protocol::messages::{
    CONTROL_PORT, DISCOVERY_WINDOW, MULTICAST_GROUP, MULTICAST_PORT, REPLY_TIMEOUT, TRANSFER_PORT,
    TRANSFER_SETUP_DELAY, TRANSFER_SETUP_WINDOW,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::session::SessionSettings;
use crate::infrastructure::network::transfer::ConnectChannel;

/// File name inside the platform config directory.
pub const CONFIG_FILE_NAME: &str = "client.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for {field}: {value:?}")]
    Invalid { field: &'static str, value: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Control and data connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_transfer_port")]
    pub transfer_port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Longest wait for a reply on the control connection, and the read or
    /// write timeout on data connections.
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    /// Pause before each data connection attempt.
    #[serde(default = "default_setup_delay_ms")]
    pub transfer_setup_delay_ms: u64,
    /// How long to keep retrying a data connection.  Keep it equal to the
    /// server's `transfer_accept_timeout_ms`.
    #[serde(default = "default_setup_window_ms")]
    pub transfer_setup_window_ms: u64,
}

/// Multicast listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    #[serde(default = "default_multicast_group")]
    pub multicast_group: String,
    #[serde(default = "default_multicast_port")]
    pub multicast_port: u16,
    /// How long one discovery pass listens.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "warn".to_string()
}
fn default_control_port() -> u16 {
    CONTROL_PORT
}
fn default_transfer_port() -> u16 {
    TRANSFER_PORT
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_reply_timeout_ms() -> u64 {
    REPLY_TIMEOUT.as_millis() as u64
}
fn default_setup_delay_ms() -> u64 {
    TRANSFER_SETUP_DELAY.as_millis() as u64
}
fn default_setup_window_ms() -> u64 {
    TRANSFER_SETUP_WINDOW.as_millis() as u64
}
fn default_multicast_group() -> String {
    Ipv4Addr::from(MULTICAST_GROUP).to_string()
}
fn default_multicast_port() -> u16 {
    MULTICAST_PORT
}
fn default_window_ms() -> u64 {
    DISCOVERY_WINDOW.as_millis() as u64
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            control_port: default_control_port(),
            transfer_port: default_transfer_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
            transfer_setup_delay_ms: default_setup_delay_ms(),
            transfer_setup_window_ms: default_setup_window_ms(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            multicast_group: default_multicast_group(),
            multicast_port: default_multicast_port(),
            window_ms: default_window_ms(),
        }
    }
}

// ── Typed accessors ───────────────────────────────────────────────────────────

impl NetworkSection {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            control_port: self.control_port,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
        }
    }

    pub fn data_channel(&self) -> ConnectChannel {
        ConnectChannel::new(
            self.transfer_port,
            Duration::from_millis(self.transfer_setup_delay_ms),
            Duration::from_millis(self.transfer_setup_window_ms),
            Duration::from_millis(self.reply_timeout_ms),
        )
    }
}

impl DiscoverySection {
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] unless `multicast_group` is an IPv4
    /// multicast address.
    pub fn group(&self) -> Result<SocketAddrV4, ConfigError> {
        match self.multicast_group.parse::<Ipv4Addr>() {
            Ok(ip) if ip.is_multicast() => Ok(SocketAddrV4::new(ip, self.multicast_port)),
            _ => Err(ConfigError::Invalid {
                field: "discovery.multicast_group",
                value: self.multicast_group.clone(),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `explicit`, or from the platform config file when
/// `None`.  A missing file yields [`ClientConfig::default()`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(explicit: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_file_path() {
            Ok(path) => path,
            Err(ConfigError::NoPlatformConfigDir) => return Ok(ClientConfig::default()),
            Err(e) => return Err(e),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Writes `config` to `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &ClientConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("FileRover"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("FileRover")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("filerover"))
    }
}
