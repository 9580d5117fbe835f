//! Proxy worker threads
//!
//! Every worker owns a [`Proxy`] driven by its own [`MioReactor`] and receives
//! client sockets over a private Unix socket pair.

use crate::backend::EngineConnector;
use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::pool::TaintRegistry;
use crate::proxy::{Proxy, ProxySettings};
use crate::reactor::handoff::send_socket;
use crate::reactor::MioReactor;
use crate::stats::ProxyState;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

/// Sending end of a worker's hand-off channel
///
/// Cheap to clone, so a blocking send can run off the async runtime.
#[derive(Debug, Clone)]
pub struct HandOff {
    worker: usize,
    control: Arc<UnixStream>,
}

impl HandOff {
    /// Pass a connected client socket to the worker
    ///
    /// Blocks while the worker's control socket is full. The caller keeps its
    /// copy of the descriptor and should close it.
    pub fn send<S: AsRawFd>(&self, socket: &S) -> Result<()> {
        send_socket(&*self.control, socket).map_err(|e| {
            ProxyError::Handoff(format!("worker {} did not take the socket: {}", self.worker, e))
        })?;
        debug!("Handed client to worker {}", self.worker);
        Ok(())
    }
}

/// Acceptor side of a running worker
pub struct WorkerHandle {
    id: usize,
    state: Arc<ProxyState>,
    hand_off: HandOff,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Worker index
    pub fn id(&self) -> usize {
        self.id
    }

    /// Live statistics of the worker
    pub fn state(&self) -> &Arc<ProxyState> {
        &self.state
    }

    /// Clients currently served by the worker
    pub fn clients(&self) -> usize {
        self.state.clients()
    }

    /// Hand-off channel of the worker
    pub fn hand_off(&self) -> &HandOff {
        &self.hand_off
    }

    /// Wait for the worker thread to exit
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Proxy worker {} panicked", self.id);
            }
        }
    }
}

/// Start worker `id` on its own thread
///
/// The worker runs until `shutdown` is set.
pub fn spawn_worker(
    id: usize,
    config: &Config,
    shutdown: Arc<AtomicBool>,
    taint: TaintRegistry,
) -> Result<WorkerHandle> {
    let (control, worker_end) = UnixStream::pair()?;
    let reactor = MioReactor::with_control(worker_end)?;
    let connector = EngineConnector::new(config.backend.clone());
    let settings = ProxySettings::from_config(config);
    let timeout = config.proxy.wait_timeout();
    let state = Arc::new(ProxyState::new(id));

    let worker_state = state.clone();
    let thread = std::thread::Builder::new()
        .name(format!("proxy-worker-{}", id))
        .spawn(move || {
            let mut proxy = Proxy::new(reactor, connector, settings, worker_state, taint);
            if let Err(e) = proxy.run(&shutdown, timeout) {
                error!("Proxy worker {} failed: {}", id, e);
            }
        })?;

    Ok(WorkerHandle {
        id,
        state,
        hand_off: HandOff {
            worker: id,
            control: Arc::new(control),
        },
        thread: Some(thread),
    })
}

/// Worker with the fewest clients
pub fn least_loaded(workers: &[WorkerHandle]) -> Option<&WorkerHandle> {
    workers.iter().min_by_key(|w| w.clients())
}
