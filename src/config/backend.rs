//! Backend engine configuration
//!
//! Describes how workers open sessions to the database engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default engine host
fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Default engine port
fn default_port() -> u16 {
    5432
}

/// Default application name reported by pooled sessions
fn default_application_name() -> String {
    "pool_worker".to_string()
}

/// Default connect timeout in seconds
fn default_connect_timeout() -> u64 {
    10
}

/// Default TCP_NODELAY setting
fn default_nodelay() -> bool {
    true
}

/// Default keepalive seconds
fn default_keepalive_secs() -> u64 {
    20
}

/// Default keepalive interval
fn default_keepalive_interval() -> u64 {
    8
}

/// Backend engine configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    /// Engine host name or address
    #[serde(default = "default_host")]
    pub host: String,

    /// Engine port, also used to name the Unix socket
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding the engine's Unix socket; preferred over TCP when set
    #[serde(default)]
    pub unix_socket_dir: Option<PathBuf>,

    /// `application_name` sent in the backend startup packet
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Password for cleartext or MD5 authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Connect and handshake timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// TCP socket options
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            host: default_host(),
            port: default_port(),
            unix_socket_dir: None,
            application_name: default_application_name(),
            password: None,
            connect_timeout: default_connect_timeout(),
            tcp: TcpConfig::default(),
        }
    }
}

impl BackendConfig {
    /// Path of the engine's Unix socket, if configured
    pub fn unix_socket_path(&self) -> Option<PathBuf> {
        self.unix_socket_dir
            .as_ref()
            .map(|dir| dir.join(format!(".s.PGSQL.{}", self.port)))
    }

    /// `host:port` string for TCP connections
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the backend configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.unix_socket_dir.is_none() && self.host.is_empty() {
            return Err("backend host must be set when unix_socket_dir is absent".to_string());
        }
        if self.connect_timeout == 0 {
            return Err("connect_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// TCP configuration for backend connections
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,

    /// TCP keepalive timeout in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            nodelay: default_nodelay(),
            keepalive_secs: default_keepalive_secs(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}
