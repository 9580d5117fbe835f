//! Reactor module for Poolrat
//!
//! The proxy worker is a single-threaded state machine driven by readiness
//! notifications. [`Reactor`] is the seam between that state machine and the
//! operating system: production workers use [`MioReactor`], tests drive the
//! proxy with scripted readiness.

pub mod handoff;
mod poller;
mod stream;

pub use poller::MioReactor;
pub use stream::ProxyStream;

use crate::channel::ChannelId;
use std::io::{self, Read, Write};
use std::time::Duration;

/// A byte stream the proxy can relay
///
/// Reads and writes are non-blocking and report `WouldBlock` when the socket
/// is not ready.
pub trait ProxyIo: Read + Write {
    /// Whether the stream is encrypted
    fn is_encrypted(&self) -> bool {
        false
    }
}

/// Readiness a channel asks to be notified about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Read readiness only
    Readable,
    /// Write readiness only
    Writable,
    /// Both directions
    Both,
}

/// One notification delivered by [`Reactor::poll`]
#[derive(Debug)]
pub enum Readiness<S> {
    /// A client stream was handed to this worker
    Accepted(S),
    /// A registered channel became ready
    Channel {
        /// Channel the notification belongs to
        id: ChannelId,
        /// Readable, or the peer closed
        readable: bool,
        /// Writable
        writable: bool,
    },
}

/// Readiness notification primitive used by a proxy worker
pub trait Reactor {
    /// Stream type produced for accepted clients
    type Stream: ProxyIo;

    /// Start watching `stream` for `interest`
    fn register(
        &mut self,
        stream: &mut Self::Stream,
        id: ChannelId,
        interest: Interest,
    ) -> io::Result<()>;

    /// Change the interest of an already registered stream
    fn reregister(
        &mut self,
        stream: &mut Self::Stream,
        id: ChannelId,
        interest: Interest,
    ) -> io::Result<()>;

    /// Stop watching `stream`
    fn deregister(&mut self, stream: &mut Self::Stream) -> io::Result<()>;

    /// Wait up to `timeout` and append ready notifications to `out`
    fn poll(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<Readiness<Self::Stream>>,
    ) -> io::Result<()>;
}
