//! Session pool module for Poolrat
//!
//! Each (database, role) pair gets its own pool of backend sessions. A pool
//! only tracks which backends are idle and which clients wait for one; the
//! channels themselves live in the proxy's arena.

mod links;
mod taint;

pub use links::PeerLinks;
pub use taint::TaintRegistry;

use crate::channel::ChannelId;
use std::collections::VecDeque;
use std::fmt;

/// Identity of a session pool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// Database name
    pub database: String,
    /// Role name
    pub user: String,
}

impl PoolKey {
    /// Create a pool key
    pub fn new(database: impl Into<String>, user: impl Into<String>) -> Self {
        PoolKey {
            database: database.into(),
            user: user.into(),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.database)
    }
}

/// How a client got (or did not get) a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// An idle backend was reused
    Existing(ChannelId),
    /// A new backend was opened
    Spawned(ChannelId),
    /// The client waits in the pending queue
    Queued,
}

/// Idle backends and pending clients of one pool
#[derive(Debug)]
pub struct SessionPool {
    key: PoolKey,
    idle_backends: VecDeque<ChannelId>,
    pending_clients: VecDeque<ChannelId>,
    /// Backends currently open for this pool
    pub n_launched_backends: usize,
    /// Clients that completed startup
    pub n_connected_clients: usize,
    /// Connected clients without a backend and not queued
    pub n_idle_clients: usize,
}

impl SessionPool {
    /// Create an empty pool
    pub fn new(key: PoolKey) -> Self {
        SessionPool {
            key,
            idle_backends: VecDeque::new(),
            pending_clients: VecDeque::new(),
            n_launched_backends: 0,
            n_connected_clients: 0,
            n_idle_clients: 0,
        }
    }

    /// Pool identity
    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Take the most recently used idle backend
    pub fn pop_idle(&mut self) -> Option<ChannelId> {
        self.idle_backends.pop_front()
    }

    /// Return a backend to the idle set
    pub fn push_idle(&mut self, backend: ChannelId) {
        debug_assert!(!self.idle_backends.contains(&backend));
        self.idle_backends.push_front(backend);
    }

    /// Forget an idle backend; returns whether it was idle
    pub fn remove_idle(&mut self, backend: ChannelId) -> bool {
        remove_from(&mut self.idle_backends, backend)
    }

    /// Queue a client behind the ones already waiting
    pub fn push_pending(&mut self, client: ChannelId) {
        debug_assert!(!self.pending_clients.contains(&client));
        self.pending_clients.push_back(client);
    }

    /// Take the longest waiting client
    pub fn pop_pending(&mut self) -> Option<ChannelId> {
        self.pending_clients.pop_front()
    }

    /// Forget a queued client; returns whether it was queued
    pub fn remove_pending(&mut self, client: ChannelId) -> bool {
        remove_from(&mut self.pending_clients, client)
    }

    /// Whether `backend` is in the idle set
    pub fn is_idle(&self, backend: ChannelId) -> bool {
        self.idle_backends.contains(&backend)
    }

    /// Whether `client` is queued
    pub fn is_pending(&self, client: ChannelId) -> bool {
        self.pending_clients.contains(&client)
    }

    /// Number of idle backends
    pub fn n_idle_backends(&self) -> usize {
        self.idle_backends.len()
    }

    /// Number of queued clients
    pub fn n_pending_clients(&self) -> usize {
        self.pending_clients.len()
    }

    /// Queued clients, head first
    pub fn pending_clients(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.pending_clients.iter().copied()
    }
}

fn remove_from(queue: &mut VecDeque<ChannelId>, id: ChannelId) -> bool {
    match queue.iter().position(|x| *x == id) {
        Some(pos) => {
            queue.remove(pos);
            true
        }
        None => false,
    }
}
