//! Client to backend association table

use crate::channel::ChannelId;
use std::collections::HashMap;

/// Symmetric peer table; both directions are always written and cleared together
#[derive(Debug, Default)]
pub struct PeerLinks {
    peers: HashMap<ChannelId, ChannelId>,
}

impl PeerLinks {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `a` with `b`, dropping any previous association of either side
    pub fn link(&mut self, a: ChannelId, b: ChannelId) {
        self.unlink(a);
        self.unlink(b);
        self.peers.insert(a, b);
        self.peers.insert(b, a);
    }

    /// Remove the association of `id`, returning its former peer
    pub fn unlink(&mut self, id: ChannelId) -> Option<ChannelId> {
        let peer = self.peers.remove(&id)?;
        self.peers.remove(&peer);
        Some(peer)
    }

    /// Current peer of `id`
    pub fn peer_of(&self, id: ChannelId) -> Option<ChannelId> {
        self.peers.get(&id).copied()
    }

    /// Number of linked pairs
    pub fn len(&self) -> usize {
        self.peers.len() / 2
    }

    /// True when nothing is linked
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
