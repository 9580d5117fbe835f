//! Channel module for Poolrat
//!
//! A channel is one socket endpoint owned by a proxy worker: either a client
//! connection or a backend session, never both.

mod buffer;

pub use buffer::ChannelBuffer;

use crate::pool::PoolKey;
use crate::reactor::Interest;
use bytes::Bytes;
use std::fmt;

/// Arena handle of a channel; never reused within a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side of the proxy a channel faces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Connection accepted from a client
    Client,
    /// Session opened to the engine
    Backend,
}

/// One endpoint of a relayed byte stream
#[derive(Debug)]
pub struct Channel<S> {
    /// Client or backend
    pub kind: ChannelKind,
    /// Underlying non-blocking stream
    pub stream: S,
    /// Bytes received from `stream`, consumed by the peer's writes
    pub buf: ChannelBuffer,
    /// Pool the channel belongs to; `None` for a client before startup
    pub pool: Option<PoolKey>,
    /// Readiness currently registered with the reactor
    pub interest: Interest,

    /// Backend carries session state and is dedicated to its client
    pub backend_is_tainted: bool,
    /// Backend reported ReadyForQuery/idle and may be rescheduled
    pub backend_is_ready: bool,
    /// Client sent Terminate, or backend must be terminated
    pub is_interrupted: bool,
    /// Channel is on the hangout list
    pub is_disconnected: bool,
    /// Last write hit WouldBlock
    pub write_pending: bool,
    /// Last read hit WouldBlock
    pub read_pending: bool,
    /// Bytes of the synthesized terminate already written
    pub terminate_offset: usize,

    /// Client startup consumed, handshake not yet replayed
    pub awaiting_handshake: bool,
    /// Client request creates state outliving the transaction
    pub alters_session: bool,
    /// Client stream is encrypted
    pub encrypted: bool,

    /// Engine process id of a backend
    pub pid: Option<i32>,
    /// Handshake captured when the backend was opened
    pub handshake_response: Bytes,
    /// Backend session state was changed after the handshake
    pub session_state_observed: bool,
}

impl<S> Channel<S> {
    fn new(kind: ChannelKind, stream: S, buffer_size: usize) -> Self {
        Channel {
            kind,
            stream,
            buf: ChannelBuffer::with_capacity(buffer_size),
            pool: None,
            interest: Interest::Both,
            backend_is_tainted: false,
            backend_is_ready: false,
            is_interrupted: false,
            is_disconnected: false,
            write_pending: false,
            read_pending: false,
            terminate_offset: 0,
            awaiting_handshake: false,
            alters_session: false,
            encrypted: false,
            pid: None,
            handshake_response: Bytes::new(),
            session_state_observed: false,
        }
    }

    /// Channel for a freshly accepted client
    pub fn client(stream: S, buffer_size: usize, encrypted: bool) -> Self {
        Channel {
            encrypted,
            ..Channel::new(ChannelKind::Client, stream, buffer_size)
        }
    }

    /// Channel for a backend that completed its handshake
    pub fn backend(
        stream: S,
        pool: PoolKey,
        handshake_response: Bytes,
        pid: Option<i32>,
        buffer_size: usize,
    ) -> Self {
        Channel {
            pool: Some(pool),
            handshake_response,
            pid,
            ..Channel::new(ChannelKind::Backend, stream, buffer_size)
        }
    }

    /// True for client-facing channels
    pub fn is_client(&self) -> bool {
        self.kind == ChannelKind::Client
    }

    /// True for backend-facing channels
    pub fn is_backend(&self) -> bool {
        self.kind == ChannelKind::Backend
    }
}
