//! Error types for Poolrat
//!
//! This module defines all custom error types used throughout the proxy.

use std::io;
use thiserror::Error;

/// Main error type for Poolrat operations
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wire protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Client startup packet was rejected
    #[error("Startup error: {0}")]
    Startup(#[from] StartupError),

    /// Backend session could not be established
    #[error("Backend error: {0}")]
    Backend(String),

    /// Socket descriptor hand-off failed
    #[error("Handoff error: {0}")]
    Handoff(String),

    /// Too many sessions or backends
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

/// Reasons a client startup packet is refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    /// Length prefix outside the accepted range
    #[error("Invalid startup packet length: {0}")]
    InvalidLength(usize),

    /// Protocol version other than 3.x
    #[error("Unsupported frontend protocol {major}.{minor}")]
    UnsupportedProtocol {
        /// Major protocol version
        major: u16,
        /// Minor protocol version
        minor: u16,
    },

    /// No user name in the parameter list
    #[error("No user name specified in startup packet")]
    MissingUser,

    /// Replication/streaming sessions cannot be pooled
    #[error("Replication connections are not supported")]
    Replication,

    /// Cancel requests cannot be routed to a pooled backend
    #[error("Cancel requests are not supported")]
    CancelRequest,

    /// Parameter list is not well formed
    #[error("Malformed startup parameters: {0}")]
    Malformed(String),
}

/// Convenience result alias for library code
pub type Result<T, E = ProxyError> = std::result::Result<T, E>;
