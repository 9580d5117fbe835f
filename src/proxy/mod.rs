//! Proxy worker
//!
//! A [`Proxy`] multiplexes many client channels over a bounded set of backend
//! sessions per pool. It is a single-threaded state machine: every transition
//! happens in response to a readiness notification from the [`Reactor`], and
//! channels are torn down only at the end of a loop iteration.

mod io;
mod scheduler;

#[cfg(test)]
mod mock;

use crate::backend::BackendConnector;
use crate::channel::{Channel, ChannelId};
use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::pool::{PeerLinks, PoolKey, SessionPool, TaintRegistry};
use crate::reactor::{Interest, ProxyIo, Reactor, Readiness};
use crate::stats::ProxyState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Limits applied by one proxy worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// Backends per pool
    pub max_backends: usize,
    /// Channels (clients and backends) per worker
    pub max_sessions: usize,
    /// Initial channel buffer size
    pub buffer_size: usize,
    /// Largest frame a channel may buffer
    pub max_frame_size: usize,
}

impl ProxySettings {
    /// Extract worker limits from the configuration
    pub fn from_config(config: &Config) -> Self {
        ProxySettings {
            max_backends: config.pool.max_backends,
            max_sessions: config.proxy.max_sessions,
            buffer_size: config.pool.buffer_size,
            max_frame_size: config.pool.max_frame_size,
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Session-pooling proxy worker
pub struct Proxy<R: Reactor, C> {
    reactor: R,
    connector: C,
    channels: HashMap<ChannelId, Channel<R::Stream>>,
    links: PeerLinks,
    pools: HashMap<PoolKey, SessionPool>,
    /// Clients registered but not yet assigned to a pool
    n_accepted_connections: usize,
    settings: ProxySettings,
    /// Channels waiting to be reaped at the end of the iteration
    hangout: Vec<ChannelId>,
    state: Arc<ProxyState>,
    taint: TaintRegistry,
    next_id: u64,
    events: Vec<Readiness<R::Stream>>,
}

impl<R, C> Proxy<R, C>
where
    R: Reactor,
    C: BackendConnector<Stream = R::Stream>,
{
    /// Create a worker
    pub fn new(
        reactor: R,
        connector: C,
        settings: ProxySettings,
        state: Arc<ProxyState>,
        taint: TaintRegistry,
    ) -> Self {
        Proxy {
            reactor,
            connector,
            channels: HashMap::new(),
            links: PeerLinks::new(),
            pools: HashMap::new(),
            n_accepted_connections: 0,
            settings,
            hangout: Vec::new(),
            state,
            taint,
            next_id: 1,
            events: Vec::new(),
        }
    }

    /// Shared statistics of this worker
    pub fn state(&self) -> &Arc<ProxyState> {
        &self.state
    }

    /// Pool for `key`, if any client asked for it
    pub fn pool(&self, key: &PoolKey) -> Option<&SessionPool> {
        self.pools.get(key)
    }

    /// Current peer of a channel
    pub fn peer_of(&self, id: ChannelId) -> Option<ChannelId> {
        self.links.peer_of(id)
    }

    /// Channel by id
    pub fn channel(&self, id: ChannelId) -> Option<&Channel<R::Stream>> {
        self.channels.get(&id)
    }

    /// Number of live channels
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// Clients that have not sent a startup packet yet
    pub fn n_accepted_connections(&self) -> usize {
        self.n_accepted_connections
    }

    /// Start serving a client stream
    pub fn add_client(&mut self, stream: R::Stream) -> Result<ChannelId> {
        let encrypted = stream.is_encrypted();
        let chan = Channel::client(stream, self.settings.buffer_size, encrypted);
        let id = self.register_channel(chan)?;
        self.n_accepted_connections += 1;
        self.state.record_client_added();
        debug!("Added client {}", id);
        Ok(id)
    }

    /// Wait for readiness once, dispatch it and reap disconnected channels
    pub fn poll_once(&mut self, timeout: Duration) -> Result<()> {
        let mut events = std::mem::take(&mut self.events);
        let polled = self.reactor.poll(Some(timeout), &mut events);
        for readiness in events.drain(..) {
            self.handle(readiness);
        }
        self.events = events;
        self.reap();
        polled.map_err(ProxyError::from)
    }

    /// Serve until `shutdown` is set
    pub fn run(&mut self, shutdown: &AtomicBool, timeout: Duration) -> Result<()> {
        info!("Proxy worker {} started", self.state.worker_id);
        while !shutdown.load(Ordering::Relaxed) {
            self.poll_once(timeout)?;
        }
        info!(
            "Proxy worker {} stopped with {} channels open",
            self.state.worker_id,
            self.channels.len()
        );
        Ok(())
    }

    fn handle(&mut self, readiness: Readiness<R::Stream>) {
        match readiness {
            Readiness::Accepted(stream) => {
                if let Err(e) = self.add_client(stream) {
                    warn!("Rejected client connection: {}", e);
                }
            }
            Readiness::Channel {
                id,
                readable,
                writable,
            } => {
                if writable && self.is_live(id) {
                    self.set_interest(id, Interest::Readable);
                    self.channel_write(id, false);
                }
                if readable && self.is_live(id) {
                    self.channel_read(id);
                }
            }
        }
    }

    fn is_live(&self, id: ChannelId) -> bool {
        self.channels
            .get(&id)
            .is_some_and(|chan| !chan.is_disconnected)
    }

    fn register_channel(&mut self, mut chan: Channel<R::Stream>) -> Result<ChannelId> {
        if self.channels.len() >= self.settings.max_sessions {
            return Err(ProxyError::ResourceExhausted(format!(
                "too many sessions, limit is {}",
                self.settings.max_sessions
            )));
        }
        let id = ChannelId(self.next_id);
        self.next_id += 1;
        self.reactor.register(&mut chan.stream, id, Interest::Both)?;
        chan.interest = Interest::Both;
        self.channels.insert(id, chan);
        Ok(id)
    }

    fn set_interest(&mut self, id: ChannelId, interest: Interest) {
        if let Some(chan) = self.channels.get_mut(&id) {
            apply_interest(&mut self.reactor, id, chan, interest);
        }
    }

    /// Remove every channel on the hangout list
    fn reap(&mut self) {
        while !self.hangout.is_empty() {
            for id in std::mem::take(&mut self.hangout) {
                self.remove_channel(id);
            }
        }
    }
}

fn apply_interest<R: Reactor>(
    reactor: &mut R,
    id: ChannelId,
    chan: &mut Channel<R::Stream>,
    interest: Interest,
) {
    if chan.interest == interest {
        return;
    }
    match reactor.reregister(&mut chan.stream, id, interest) {
        Ok(()) => chan.interest = interest,
        Err(e) => warn!("Failed to change interest of {}: {}", id, e),
    }
}
