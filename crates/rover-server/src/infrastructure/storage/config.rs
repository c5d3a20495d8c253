//! TOML-based configuration for the server.
//!
//! Read from `server.toml` in the platform config directory:
//! - Linux:    `$XDG_CONFIG_HOME/filerover/server.toml` or `~/.config/filerover/server.toml`
//! - Windows:  `%APPDATA%\FileRover\server.toml`
//! - macOS:    `~/Library/Application Support/FileRover/server.toml`
//!
//! Example:
//!
//! ```toml
//! [server]
//! root = "/srv/share"
//! log_level = "debug"
//!
//! [network]
//! control_port = 56740
//! transfer_port = 56744
//!
//! [discovery]
//! enabled = false
//! ```
//!
//! Every field has a default, so a missing file, an empty file, or a file
//! from an older version all load.

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rover_core::protocol::messages::{
    CONTROL_PORT, HEARTBEAT_INTERVAL, MULTICAST_GROUP, MULTICAST_PORT, REPLY_TIMEOUT,
    TRANSFER_PORT, TRANSFER_SETUP_WINDOW,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name inside the platform config directory.
pub const CONFIG_FILE_NAME: &str = "server.toml";

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

    /// A field parsed but holds an unusable value.
    #[error("invalid value for {field}: {value:?}")]
    Invalid { field: &'static str, value: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
}

/// What to share and how much to log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Directory exposed to clients.  Relative paths are resolved against
    /// the working directory.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    /// Address both TCP listeners bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_transfer_port")]
    pub transfer_port: u16,
    /// How long a queued transfer waits for the client to connect, and the
    /// read/write timeout on the data connection.
    #[serde(default = "default_accept_timeout_ms")]
    pub transfer_accept_timeout_ms: u64,
    /// How long a negotiation waits for the client's marker.
    #[serde(default = "default_negotiation_timeout_ms")]
    pub negotiation_timeout_ms: u64,
}

/// Multicast heartbeat settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_multicast_group")]
    pub multicast_group: String,
    #[serde(default = "default_multicast_port")]
    pub multicast_port: u16,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_multicast_ttl")]
    pub multicast_ttl: u32,
    /// Address put in heartbeats.  Detected from the routing table if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_address: Option<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_control_port() -> u16 {
    CONTROL_PORT
}
fn default_transfer_port() -> u16 {
    TRANSFER_PORT
}
fn default_accept_timeout_ms() -> u64 {
    TRANSFER_SETUP_WINDOW.as_millis() as u64
}
fn default_negotiation_timeout_ms() -> u64 {
    REPLY_TIMEOUT.as_millis() as u64
}
fn default_true() -> bool {
    true
}
fn default_multicast_group() -> String {
    Ipv4Addr::from(MULTICAST_GROUP).to_string()
}
fn default_multicast_port() -> u16 {
    MULTICAST_PORT
}
fn default_heartbeat_interval_ms() -> u64 {
    HEARTBEAT_INTERVAL.as_millis() as u64
}
fn default_multicast_ttl() -> u32 {
    2
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            control_port: default_control_port(),
            transfer_port: default_transfer_port(),
            transfer_accept_timeout_ms: default_accept_timeout_ms(),
            negotiation_timeout_ms: default_negotiation_timeout_ms(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            multicast_group: default_multicast_group(),
            multicast_port: default_multicast_port(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            multicast_ttl: default_multicast_ttl(),
            advertise_address: None,
        }
    }
}

// ── Typed accessors ───────────────────────────────────────────────────────────

impl NetworkSection {
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if `bind_address` is not an IP address.
    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.bind_address.parse().map_err(|_| ConfigError::Invalid {
            field: "network.bind_address",
            value: self.bind_address.clone(),
        })
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_accept_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
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

    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if `advertise_address` is set but is not an
    /// IPv4 address.
    pub fn advertise_ip(&self) -> Result<Option<Ipv4Addr>, ConfigError> {
        self.advertise_address
            .as_deref()
            .map(|raw| {
                raw.parse().map_err(|_| ConfigError::Invalid {
                    field: "discovery.advertise_address",
                    value: raw.to_string(),
                })
            })
            .transpose()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
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
/// `None`.  A missing file yields [`ServerConfig::default()`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(explicit: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_file_path() {
            Ok(path) => path,
            Err(ConfigError::NoPlatformConfigDir) => return Ok(ServerConfig::default()),
            Err(e) => return Err(e),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Writes `config` to `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &ServerConfig, path: &Path) -> Result<(), ConfigError> {
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

/// Resolves the platform config base directory including the `filerover`
/// subdirectory.
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

// ── Tests ─────────────────────────────────────────────────────────────────────
