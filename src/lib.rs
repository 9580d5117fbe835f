//! # Poolrat - Transaction-level Session Pooling Proxy
//!
//! Poolrat sits between PostgreSQL-protocol clients and a database engine and
//! multiplexes many client connections over a small set of backend sessions.
//! A backend is attached to a client only for the duration of a transaction
//! and goes back to its pool as soon as the engine reports that it is idle
//! again.
//!
//! ## Features
//!
//! - **Transaction-level pooling**: one pool per (database, role) pair with a
//!   bounded number of backend sessions
//! - **FIFO queueing**: clients wait in arrival order when a pool is saturated
//! - **Session state detection**: backends that picked up session state stay
//!   dedicated to their client
//! - **Handshake replay**: new clients are served the cached login handshake
//!   of a pooled backend
//! - **Multiple workers**: independent single-threaded event loops, clients
//!   handed over by descriptor passing
//!
//! ## Usage
//!
//! ```rust,ignore
//! use poolrat::config::load_config;
//! use poolrat::server::run_server;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("poolrat.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     run_server(config, shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Client -> Acceptor (tokio) -> fd hand-off -> Proxy worker (mio) -> Engine
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod helper;
pub mod pool;
pub mod protocol;
pub mod proxy;
pub mod reactor;
pub mod server;
pub mod stats;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{ProxyError, StartupError};
pub use proxy::{Proxy, ProxySettings};
pub use server::run_server;

/// Version of the Poolrat library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
