//! Proxy configuration types
//!
//! Defines the root configuration structure and the listener/worker settings.

use super::{BackendConfig, PoolConfig};
use crate::helper::DEFAULT_WAIT_TIMEOUT_MS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default client listen address
fn default_listen_addr() -> String {
    "0.0.0.0:6432".to_string()
}

/// Default number of proxy workers
fn default_workers() -> usize {
    2
}

/// Default maximum sessions per worker
fn default_max_sessions() -> usize {
    1000
}

/// Default event wait timeout in milliseconds
fn default_wait_timeout_ms() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Listener and worker configuration
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Session pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Backend engine configuration
    #[serde(default)]
    pub backend: BackendConfig,
}

impl Config {
    /// Validate every section
    pub fn validate(&self) -> Result<(), String> {
        self.proxy.validate()?;
        self.pool.validate()?;
        self.backend.validate()?;
        Ok(())
    }
}

/// Listener and worker configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Address clients connect to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Address of the diagnostics listener (disabled when absent)
    #[serde(default)]
    pub admin_addr: Option<String>,

    /// Number of independent proxy workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum number of client plus backend sessions per worker
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Upper bound on one event wait, used to observe shutdown
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            listen_addr: default_listen_addr(),
            admin_addr: None,
            workers: default_workers(),
            max_sessions: default_max_sessions(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

impl ProxyConfig {
    /// Event wait timeout as a duration
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Validate the proxy configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be greater than 0".to_string());
        }
        if self.wait_timeout_ms == 0 {
            return Err("wait_timeout_ms must be greater than 0".to_string());
        }
        if self.listen_addr.is_empty() {
            return Err("listen_addr must not be empty".to_string());
        }
        Ok(())
    }
}
