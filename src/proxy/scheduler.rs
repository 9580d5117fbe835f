//! Backend scheduling
//!
//! Decides which backend serves which client, when a backend goes back to
//! its pool, and what happens to the other side when a channel goes away.

use super::Proxy;
use crate::backend::BackendConnector;
use crate::channel::{Channel, ChannelId, ChannelKind};
use crate::pool::{Attach, PoolKey, SessionPool};
use crate::protocol::{backend_pid, parse_startup, StartupRequest};
use crate::reactor::Reactor;
use tracing::{debug, info, warn};

/// Outcome of processing a startup packet
pub(super) enum Connect {
    /// Client joined a pool
    Pooled,
    /// Encryption request refused, client may retry in plain text
    Refused,
    /// Client was rejected and hung out
    Rejected,
}

impl<R, C> Proxy<R, C>
where
    R: Reactor,
    C: BackendConnector<Stream = R::Stream>,
{
    /// Parse the startup packet of client `id` and assign the client to a pool
    pub(super) fn client_connect(&mut self, id: ChannelId, packet_len: usize) -> Connect {
        let parsed = match self.channels.get(&id) {
            Some(chan) => parse_startup(&chan.buf.received()[..packet_len]),
            None => return Connect::Rejected,
        };

        let params = match parsed {
            Ok(StartupRequest::Startup(params)) => params,
            Ok(StartupRequest::Ssl) | Ok(StartupRequest::GssEnc) => {
                debug!("Client {} asked for encryption, refusing", id);
                return if self.refuse_encryption(id, packet_len) {
                    Connect::Refused
                } else {
                    Connect::Rejected
                };
            }
            Err(e) => {
                warn!("Rejected client {}: {}", id, e);
                self.hangout(id, "invalid startup packet");
                return Connect::Rejected;
            }
        };

        let key = PoolKey::new(params.database, params.user);
        let pool = self.pools.entry(key.clone()).or_insert_with(|| {
            info!("Created session pool {}", key);
            self.state.record_pool_created();
            SessionPool::new(key.clone())
        });
        pool.n_connected_clients += 1;
        pool.n_idle_clients += 1;
        self.n_accepted_connections = self.n_accepted_connections.saturating_sub(1);

        if let Some(chan) = self.channels.get_mut(&id) {
            if chan.encrypted {
                self.state.record_ssl_client_added();
            }
            chan.pool = Some(key.clone());
        }
        debug!("Client {} connects to {}", id, key);
        Connect::Pooled
    }

    /// Find a backend for client `id`: reuse an idle one, open a new one, or queue
    pub(super) fn client_attach(&mut self, id: ChannelId) -> Attach {
        let Some(key) = self.channels.get(&id).and_then(|chan| chan.pool.clone()) else {
            return Attach::Queued;
        };
        let Some(pool) = self.pools.get_mut(&key) else {
            return Attach::Queued;
        };
        pool.n_idle_clients = pool.n_idle_clients.saturating_sub(1);

        if let Some(backend) = pool.pop_idle() {
            self.links.link(id, backend);
            debug!("Attached client {} to idle backend {}", id, backend);
            return Attach::Existing(backend);
        }

        if pool.n_launched_backends < self.settings.max_backends {
            if let Some(backend) = self.backend_start(&key) {
                self.links.link(id, backend);
                debug!("Attached client {} to new backend {}", id, backend);
                return Attach::Spawned(backend);
            }
        }

        debug!("Client {} waits for a backend of {}", id, key);
        if let Some(pool) = self.pools.get_mut(&key) {
            pool.push_pending(id);
        }
        Attach::Queued
    }

    /// Open a backend session for `key` and register it
    pub(super) fn backend_start(&mut self, key: &PoolKey) -> Option<ChannelId> {
        if self.channels.len() >= self.settings.max_sessions {
            warn!("Cannot start backend for {}: session limit reached", key);
            return None;
        }
        let conn = match self.connector.connect(key) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to start backend for {}: {}", key, e);
                return None;
            }
        };

        let pid = backend_pid(&conn.handshake_response);
        let chan = Channel::backend(
            conn.stream,
            key.clone(),
            conn.handshake_response,
            pid,
            self.settings.buffer_size,
        );
        match self.register_channel(chan) {
            Ok(id) => {
                self.state.record_backend_added();
                if let Some(pool) = self.pools.get_mut(key) {
                    pool.n_launched_backends += 1;
                }
                info!("Started backend {} (pid {:?}) for {}", id, pid, key);
                Some(id)
            }
            Err(e) => {
                warn!("Failed to register backend for {}: {}", key, e);
                None
            }
        }
    }

    /// Whether a backend carries session state and must stay with its client
    fn is_tainted(&self, chan: &Channel<R::Stream>) -> bool {
        chan.backend_is_tainted
            || chan.session_state_observed
            || chan.pid.is_some_and(|pid| self.taint.contains(pid))
    }

    /// Backend `id` finished a transaction: hand it to the next client or park it
    pub(super) fn backend_reschedule(&mut self, id: ChannelId, is_new: bool) -> bool {
        let Some(chan) = self.channels.get(&id) else {
            return false;
        };
        let tainted = !is_new && self.is_tainted(chan);
        let Some(key) = chan.pool.clone() else {
            return false;
        };
        let Some(chan) = self.channels.get_mut(&id) else {
            return false;
        };
        chan.backend_is_ready = false;

        if tainted {
            if !chan.backend_is_tainted {
                chan.backend_is_tainted = true;
                self.state.record_dedicated_added();
                info!(
                    "Backend {} (pid {:?}) keeps session state, dedicating it to its client",
                    id, chan.pid
                );
            }
            return true;
        }

        let Some(pool) = self.pools.get_mut(&key) else {
            return false;
        };
        if self.links.unlink(id).is_some() {
            pool.n_idle_clients += 1;
        }

        // Bytes past ReadyForQuery belong to the previous client's session
        let clean = self
            .channels
            .get(&id)
            .is_some_and(|chan| chan.buf.is_empty());
        if !clean {
            self.hangout(id, "unconsumed output from backend");
            return false;
        }

        let Some(pool) = self.pools.get_mut(&key) else {
            return false;
        };
        match pool.pop_pending() {
            Some(client) => {
                self.links.link(id, client);
                let awaiting = self
                    .channels
                    .get(&client)
                    .is_some_and(|chan| chan.awaiting_handshake);
                if awaiting {
                    self.replay_handshake(id, client);
                    self.channel_write(client, false)
                } else {
                    debug!("Sending queued request of client {} to backend {}", client, id);
                    self.channel_write(id, false)
                }
            }
            None => {
                pool.push_idle(id);
                debug!("Backend {} is idle in {}", id, key);
                true
            }
        }
    }

    /// Deferred teardown of channel `id`
    ///
    /// Safe to call repeatedly. The channel stays in the arena until the end
    /// of the loop iteration.
    pub(super) fn hangout(&mut self, id: ChannelId, reason: &str) {
        let Some(chan) = self.channels.get_mut(&id) else {
            return;
        };
        if chan.is_disconnected {
            return;
        }
        chan.is_disconnected = true;
        chan.backend_is_ready = false;
        let kind = chan.kind;
        let key = chan.pool.clone();
        let interrupted = chan.is_interrupted;
        debug!("Hangout {:?} {}: {}", kind, id, reason);

        let peer = self.links.unlink(id);
        if let Some(pool) = key.as_ref().and_then(|key| self.pools.get_mut(key)) {
            match kind {
                ChannelKind::Client => {
                    if !pool.remove_pending(id) && peer.is_none() {
                        pool.n_idle_clients = pool.n_idle_clients.saturating_sub(1);
                    }
                }
                ChannelKind::Backend => {
                    pool.remove_idle(id);
                }
            }
        }
        self.hangout.push(id);

        match (kind, peer) {
            (ChannelKind::Client, Some(backend)) => {
                let releasable = interrupted
                    && self.channels.get(&backend).is_some_and(|chan| {
                        !chan.is_interrupted && chan.backend_is_ready && !self.is_tainted(chan)
                    });
                if releasable {
                    // Whatever the backend still holds was meant for this client
                    if let Some(chan) = self.channels.get_mut(&backend) {
                        chan.buf.clear();
                    }
                    self.backend_reschedule(backend, false);
                } else if self
                    .channels
                    .get(&backend)
                    .is_some_and(|chan| !chan.is_interrupted)
                {
                    self.terminate_backend(backend);
                }
            }
            (ChannelKind::Backend, Some(client)) => {
                // The session the client was using is gone
                if let Some(pool) = key.as_ref().and_then(|key| self.pools.get_mut(key)) {
                    pool.n_idle_clients += 1;
                }
                self.hangout(client, "backend session lost");
            }
            _ => {}
        }
    }

    /// Mark backend `id` for termination and start sending the terminate frame
    fn terminate_backend(&mut self, id: ChannelId) {
        if let Some(chan) = self.channels.get_mut(&id) {
            debug!("Terminating backend {} (pid {:?})", id, chan.pid);
            chan.is_interrupted = true;
        }
        self.channel_write(id, false);
    }

    /// Drop a hung-out channel and fix up counters
    pub(super) fn remove_channel(&mut self, id: ChannelId) {
        let Some(mut chan) = self.channels.remove(&id) else {
            return;
        };
        if let Err(e) = self.reactor.deregister(&mut chan.stream) {
            debug!("Failed to deregister {}: {}", id, e);
        }

        match chan.kind {
            ChannelKind::Client => {
                match chan.pool.as_ref().and_then(|key| self.pools.get_mut(key)) {
                    Some(pool) => {
                        pool.n_connected_clients = pool.n_connected_clients.saturating_sub(1);
                        if chan.encrypted {
                            self.state.record_ssl_client_removed();
                        }
                    }
                    None => {
                        self.n_accepted_connections = self.n_accepted_connections.saturating_sub(1)
                    }
                }
                self.state.record_client_removed();
                debug!("Removed client {}", id);
            }
            ChannelKind::Backend => {
                self.state.record_backend_removed();
                if chan.backend_is_tainted {
                    self.state.record_dedicated_removed();
                }
                if let Some(pid) = chan.pid {
                    self.taint.forget(pid);
                }
                let Some(key) = chan.pool.clone() else {
                    return;
                };
                let replace = match self.pools.get_mut(&key) {
                    Some(pool) => {
                        pool.n_launched_backends = pool.n_launched_backends.saturating_sub(1);
                        pool.n_pending_clients() > 0
                            && pool.n_launched_backends < self.settings.max_backends
                    }
                    None => false,
                };
                info!("Removed backend {} (pid {:?}) of {}", id, chan.pid, key);
                // Close the old session before opening its replacement
                drop(chan);
                if replace {
                    if let Some(backend) = self.backend_start(&key) {
                        info!("Started backend {} to replace {}", backend, id);
                        self.backend_reschedule(backend, true);
                    }
                }
            }
        }
    }
}
