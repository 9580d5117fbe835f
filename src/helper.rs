//! Helper utilities for Poolrat
//!
//! This module provides common constants and socket tuning used throughout the proxy.

use crate::config::TcpConfig;
use std::time::Duration;

/// Maximum number of readiness events handled per loop iteration
pub const MAX_READY_EVENTS: usize = 128;

/// Largest startup packet a client may send
pub const MAX_STARTUP_PACKET_LENGTH: usize = 10000;

/// Largest message the engine itself accepts (1 GiB - 1)
pub const MAX_FRAME_SIZE: usize = 0x3fff_ffff;

/// Default event wait timeout in milliseconds
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 1000;

/// Socket options for backend connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }
}

impl SocketOpts {
    /// Create socket options from TCP config
    pub fn from_tcp_config(config: &TcpConfig) -> Self {
        SocketOpts {
            nodelay: config.nodelay,
            keepalive_secs: Some(config.keepalive_secs),
            keepalive_interval: Some(config.keepalive_interval),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &std::net::TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Parse duration from seconds
pub fn duration_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
