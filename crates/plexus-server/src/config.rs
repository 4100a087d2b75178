//! Server configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use plexus_core::ConnectionInfo;
use serde::{Deserialize, Serialize};

/// How bearer tokens are turned into a [`ConnectionInfo`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityConfig {
    /// Fixed token table, for development and tests.
    Static { tokens: HashMap<String, ConnectionInfo> },
    /// HS256 tokens signed with a shared secret.
    Jwt { secret: String },
    /// Ask an accounts service.
    Http { url: String },
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig::Static {
            tokens: HashMap::new(),
        }
    }
}

/// Configuration for the plexus server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Wire mode for clients that do not pass `binary=`.
    pub default_binary: bool,
    /// Outbound frames buffered per connection before drops start.
    pub max_send_queue: usize,
    /// Concurrently running heavy operations.
    pub rate: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection silent for this long.
    pub heartbeat_timeout_secs: u64,
    /// Reap containers with no clients after this long.
    pub idle_container_secs: u64,
    /// Upper bound on graceful shutdown.
    pub shutdown_timeout_secs: u64,
    pub identity: IdentityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            default_binary: false,
            max_send_queue: 256,
            rate: 25,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            idle_container_secs: 60,
            shutdown_timeout_secs: 30,
            identity: IdentityConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn idle_container(&self) -> Duration {
        Duration::from_secs(self.idle_container_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {message}")]
    Read { path: String, message: String },

    #[error("invalid config {path}: {message}")]
    Parse { path: String, message: String },
}
