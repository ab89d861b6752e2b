//! Configuration for the drishti-relay daemon
//!
//! Loads configuration from a TOML file. All values are resolved once at
//! process start; nothing is reloadable at runtime.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    pub network: NetworkConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// TCP bind address for the relay server
    ///
    /// Examples:
    /// - `0.0.0.0:7500` - All interfaces on port 7500
    /// - `127.0.0.1:7500` - Localhost only
    pub bind_address: String,

    /// Upstream producer to dial at startup, `host:port`. When set, the
    /// relay pulls a camera uplink from the remote endpoint instead of
    /// waiting for it to connect.
    #[serde(default)]
    pub remote_address: Option<String>,

    /// Bind dialing sockets to one of the well-known local ports instead of
    /// an ephemeral one (NAT/firewall traversal on closed networks)
    #[serde(default)]
    pub fixed_local_port: bool,
}

/// Socket timeout and reconnect configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Per-read deadline in seconds (header and body reads alike)
    pub read_timeout_secs: u64,
    /// Per-write deadline in seconds
    pub write_timeout_secs: u64,
    /// Delay before redialing after a failed or dropped client connection
    pub reconnect_backoff_secs: u64,
}

/// Buffer pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Number of preallocated buffers (the overflow buffer is extra)
    pub buffer_count: usize,
    /// Capacity of each buffer in bytes
    pub buffer_capacity: usize,
}

/// Routing and switching configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Switching strategy: "manual", "timer", "headset" or "location"
    pub strategy: String,
    /// Rotation interval in seconds (timer strategy only)
    pub rotation_interval_secs: u64,
    /// Accept-side classification: "first-reader", "port-range" or "ip-range"
    pub classify: String,
    /// Peer source-port window treated as readers (port-range classifier)
    pub reader_port_range: Option<[u16; 2]>,
    /// Peer address-suffix window treated as readers (ip-range classifier)
    pub reader_suffix_range: Option<[u8; 2]>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 5,
            write_timeout_secs: 5,
            reconnect_backoff_secs: 1,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_count: 16,
            buffer_capacity: 1024 * 1024,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: "manual".to_string(),
            rotation_interval_secs: 10,
            classify: "first-reader".to_string(),
            reader_port_range: None,
            reader_suffix_range: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TransportConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}

impl RoutingConfig {
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }
}

impl RelayConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Default configuration for a single-relay closed network
    ///
    /// Suitable for testing and development. Production deployments
    /// should use a proper TOML configuration file.
    pub fn relay_defaults() -> Self {
        Self {
            network: NetworkConfig {
                bind_address: "0.0.0.0:7500".to_string(),
                remote_address: None,
                fixed_local_port: false,
            },
            transport: TransportConfig::default(),
            pool: PoolConfig::default(),
            routing: RoutingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Reject inconsistent configuration before any socket is opened
    pub fn validate(&self) -> Result<()> {
        if self.network.bind_address.is_empty() {
            return Err(Error::Config("bind_address must not be empty".into()));
        }
        if matches!(&self.network.remote_address, Some(remote) if remote.is_empty()) {
            return Err(Error::Config("remote_address must not be empty".into()));
        }
        if self.pool.buffer_count == 0 {
            return Err(Error::Config("pool.buffer_count must be at least 1".into()));
        }
        if self.pool.buffer_capacity == 0 {
            return Err(Error::Config("pool.buffer_capacity must be non-zero".into()));
        }
        if self.transport.read_timeout_secs == 0 || self.transport.write_timeout_secs == 0 {
            return Err(Error::Config("transport timeouts must be non-zero".into()));
        }
        match self.routing.strategy.as_str() {
            "manual" | "timer" | "headset" | "location" => {}
            other => {
                return Err(Error::Config(format!("unknown switching strategy: {other}")));
            }
        }
        match self.routing.classify.as_str() {
            "first-reader" => {}
            "port-range" => {
                if self.routing.reader_port_range.is_none() {
                    return Err(Error::Config(
                        "classify = \"port-range\" requires reader_port_range".into(),
                    ));
                }
            }
            "ip-range" => {
                if self.routing.reader_suffix_range.is_none() {
                    return Err(Error::Config(
                        "classify = \"ip-range\" requires reader_suffix_range".into(),
                    ));
                }
            }
            other => {
                return Err(Error::Config(format!("unknown classify policy: {other}")));
            }
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::relay_defaults()
    }
}
