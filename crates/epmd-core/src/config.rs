//! Configuration for the daemon and its clients.
//!
//! Resolution order: environment variables → config file → defaults.
//! Command-line flags are applied on top by the binaries.
//!
//! Config file location:
//!   1. $EPMD_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/epmd/config.toml
//!   3. ~/.config/epmd/config.toml

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wire::{DEFAULT_EPMD_PORT, EPMD_PORT_ENV, LIVENESS_PROBE_TIMEOUT_SECS};

/// Comma-separated list of source addresses allowed to talk to the daemon.
pub const EPMD_ADDRESS_ENV: &str = "ERL_EPMD_ADDRESS";

/// Any value enables `Kill` and `Stop`.
pub const EPMD_RELAXED_ENV: &str = "ERL_EPMD_RELAXED_COMMAND_CHECK";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EpmdConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub listen_address: IpAddr,
    /// Source addresses accepted. Empty, or containing an unspecified
    /// address (0.0.0.0 / ::), accepts everyone.
    pub allowed_addresses: Vec<IpAddr>,
    /// Permit `Kill` and `Stop`.
    pub relaxed_command_check: bool,
    /// Connections handled at once; the rest wait in the accept queue.
    pub max_connections: usize,
    /// How long a new connection may take to deliver its request.
    pub read_timeout_ms: u64,
    /// How long a peer may take to accept the response before the
    /// connection is dropped.
    pub write_timeout_ms: u64,
    pub liveness_timeout_ms: u64,
    /// Time in-flight handlers get to finish after shutdown is signalled.
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: IpAddr,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Bound on one request/response exchange, not on a registration's lifetime.
    pub request_timeout_ms: u64,
    /// Calls allowed on the wire at once per client.
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log at debug level unless RUST_LOG says otherwise.
    pub debug: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_EPMD_PORT,
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            allowed_addresses: vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ],
            relaxed_command_check: false,
            max_connections: 512,
            read_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            liveness_timeout_ms: LIVENESS_PROBE_TIMEOUT_SECS * 1_000,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_EPMD_PORT,
            connect_timeout_ms: 2_000,
            request_timeout_ms: 5_000,
            max_in_flight: 8,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Whether a connection from `peer` may be served.
    pub fn allows(&self, peer: IpAddr) -> bool {
        if self.allowed_addresses.is_empty() {
            return true;
        }
        let peer = canonical(peer);
        self.allowed_addresses
            .iter()
            .any(|a| a.is_unspecified() || canonical(*a) == peer)
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// IPv4-mapped IPv6 addresses compare equal to their IPv4 form.
fn canonical(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("epmd")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl EpmdConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = Self::load_file(&path)?;
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Parse `path`, or return defaults when it does not exist.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("EPMD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply the `ERL_EPMD_*` overrides. `lookup` stands in for the process
    /// environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(v) = lookup(EPMD_PORT_ENV) {
            let port: u16 = v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: EPMD_PORT_ENV,
                value: v.clone(),
            })?;
            self.server.port = port;
            self.client.port = port;
        }
        if let Some(v) = lookup(EPMD_ADDRESS_ENV) {
            self.server.allowed_addresses = parse_address_list(&v).ok_or_else(|| {
                ConfigError::InvalidEnv {
                    var: EPMD_ADDRESS_ENV,
                    value: v.clone(),
                }
            })?;
        }
        if lookup(EPMD_RELAXED_ENV).is_some() {
            self.server.relaxed_command_check = true;
        }
        Ok(())
    }
}

/// Parse `"127.0.0.1, ::1"`. Blank entries are skipped.
pub fn parse_address_list(text: &str) -> Option<Vec<IpAddr>> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}
