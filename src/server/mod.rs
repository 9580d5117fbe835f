//! Server module for Poolrat
//!
//! Accepts client connections on the tokio runtime and spreads them over the
//! proxy workers, which do all of the relaying on their own threads.

mod admin;
mod worker;

pub use admin::{serve_admin, AdminCommand};
pub use worker::{least_loaded, spawn_worker, HandOff, WorkerHandle};

use crate::config::Config;
use crate::pool::TaintRegistry;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Bind the configured listeners and serve until shutdown
pub async fn run_server(config: Config, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(&config.proxy.listen_addr)
        .await
        .with_context(|| format!("Failed to listen on {}", config.proxy.listen_addr))?;
    serve(config, listener, shutdown_rx).await
}

/// Serve clients accepted on `listener` until shutdown
pub async fn serve(
    config: Config,
    listener: TcpListener,
    mut shutdown_rx: broadcast::Receiver<bool>,
) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let taint = TaintRegistry::new();

    let mut workers = Vec::with_capacity(config.proxy.workers);
    for id in 0..config.proxy.workers {
        let worker = spawn_worker(id, &config, shutdown.clone(), taint.clone())
            .with_context(|| format!("Failed to start proxy worker {}", id))?;
        workers.push(worker);
    }
    info!("Started {} proxy workers", workers.len());

    let admin = match &config.proxy.admin_addr {
        Some(addr) => {
            let admin_listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to listen on {}", addr))?;
            info!("Admin listener on {}", addr);
            let states = workers.iter().map(|w| w.state().clone()).collect();
            Some(tokio::spawn(serve_admin(admin_listener, states, taint.clone())))
        }
        None => None,
    };

    info!("Accepting clients on {}", listener.local_addr()?);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted client {}", peer);
                    if let Err(e) = dispatch(&workers, stream).await {
                        warn!("Failed to dispatch client {}: {:#}", peer, e);
                    }
                }
                Err(e) => warn!("Failed to accept client: {}", e),
            },
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping server");
                break;
            }
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    if let Some(admin) = admin {
        admin.abort();
    }
    for worker in workers {
        worker.join();
    }
    info!("Server stopped");
    Ok(())
}

/// Hand a client to the least loaded worker; our copy closes on return
async fn dispatch(workers: &[WorkerHandle], stream: TcpStream) -> Result<()> {
    let stream = stream.into_std().context("Failed to detach client socket")?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY on client: {}", e);
    }
    let hand_off = least_loaded(workers)
        .context("No proxy workers running")?
        .hand_off()
        .clone();
    tokio::task::spawn_blocking(move || hand_off.send(&stream))
        .await
        .context("Hand-off task failed")??;
    Ok(())
}
