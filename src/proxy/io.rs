//! Channel read/write state machine
//!
//! Reads fill a channel's own buffer; writes drain the *peer's* buffer into
//! the channel's stream. A channel with bytes still waiting to be written by
//! its peer does not read any further, which is the only backpressure there
//! is.

use super::scheduler::Connect;
use super::{apply_interest, Proxy};
use crate::backend::BackendConnector;
use crate::channel::ChannelId;
use crate::pool::Attach;
use crate::protocol::consts::{ENCRYPTION_REFUSED, FRAME_HEADER_LEN, TERMINATE_FRAME};
use crate::protocol::{classify, frame_len, startup_len, Marker, Origin};
use crate::reactor::{Interest, Reactor};
use std::io::{ErrorKind, Write};
use tracing::{debug, trace, warn};

/// Result of one write attempt
pub(super) enum WriteStatus {
    /// `n` bytes were accepted
    Done(usize),
    /// The socket is full
    Blocked,
    /// The socket failed or was closed
    Closed(String),
}

/// What the frame scan decided
enum Scan {
    /// Keep reading
    Continue,
    /// Stop reading and report this to the caller
    Stop(bool),
}

impl<R, C> Proxy<R, C>
where
    R: Reactor,
    C: BackendConnector<Stream = R::Stream>,
{
    /// Write `data` to the stream of channel `id`, adjusting readiness interest
    pub(super) fn socket_write(&mut self, id: ChannelId, data: &[u8]) -> WriteStatus {
        let Some(chan) = self.channels.get_mut(&id) else {
            return WriteStatus::Closed("channel is gone".to_string());
        };
        loop {
            match chan.stream.write(data) {
                Ok(0) => return WriteStatus::Closed("write returned zero bytes".to_string()),
                Ok(n) => {
                    if chan.write_pending {
                        chan.write_pending = false;
                        apply_interest(&mut self.reactor, id, chan, Interest::Readable);
                    }
                    return WriteStatus::Done(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    chan.write_pending = true;
                    let interest = if chan.read_pending {
                        Interest::Both
                    } else {
                        Interest::Writable
                    };
                    apply_interest(&mut self.reactor, id, chan, interest);
                    return WriteStatus::Blocked;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return WriteStatus::Closed(format!("write failed: {}", e)),
            }
        }
    }

    /// Send the peer's pending bytes to channel `id`
    ///
    /// `synchronous` is set when called from the peer's own read loop, which
    /// then keeps reading by itself. Returns false when nothing more can be
    /// done until the next notification.
    pub(super) fn channel_write(&mut self, id: ChannelId, synchronous: bool) -> bool {
        let Some(chan) = self.channels.get(&id) else {
            return false;
        };
        if chan.is_disconnected {
            return false;
        }
        if chan.is_backend() && chan.is_interrupted {
            return self.write_terminate(id);
        }
        let writer_is_client = chan.is_client();
        let Some(peer) = self.links.peer_of(id) else {
            return false;
        };
        let Some(peer_chan) = self.channels.get_mut(&peer) else {
            return false;
        };

        let mut src = std::mem::take(&mut peer_chan.buf);
        let mut stopped = None;
        while !src.pending_tx().is_empty() {
            match self.socket_write(id, src.pending_tx()) {
                WriteStatus::Done(n) => {
                    trace!("{}: wrote {} of {} bytes", id, n, src.pending_tx().len());
                    src.advance_tx(n);
                    if writer_is_client {
                        self.state.record_tx(n);
                    } else {
                        self.state.record_rx(n);
                    }
                }
                status => {
                    stopped = Some(status);
                    break;
                }
            }
        }
        let flushed = stopped.is_none() && src.tx_size() != 0;
        if flushed {
            src.complete_tx();
        }
        if let Some(peer_chan) = self.channels.get_mut(&peer) {
            peer_chan.buf = src;
        }

        match stopped {
            Some(WriteStatus::Closed(reason)) => {
                self.hangout(id, &reason);
                return false;
            }
            Some(_) => return false,
            None => {}
        }

        if flushed {
            let source_alters = match self.channels.get_mut(&peer) {
                Some(source) if source.is_client() && source.alters_session => {
                    source.alters_session = false;
                    true
                }
                _ => false,
            };
            if let Some(writer) = self.channels.get_mut(&id) {
                writer.backend_is_ready = false;
                if source_alters {
                    writer.session_state_observed = true;
                }
            }
            let source_ready = self
                .channels
                .get(&peer)
                .is_some_and(|source| source.is_backend() && source.backend_is_ready);
            if source_ready {
                self.backend_reschedule(peer, false);
                // A client may have pipelined its next request behind the handshake
                let buffered = self
                    .channels
                    .get(&id)
                    .is_some_and(|writer| writer.is_client() && !writer.buf.is_empty());
                return if buffered && !synchronous {
                    self.channel_read(id)
                } else {
                    true
                };
            }
        }
        synchronous || self.channel_read(peer)
    }

    /// Push the synthesized terminate frame to an interrupted backend
    fn write_terminate(&mut self, id: ChannelId) -> bool {
        loop {
            let offset = match self.channels.get(&id) {
                Some(chan) => chan.terminate_offset,
                None => return false,
            };
            if offset == TERMINATE_FRAME.len() {
                break;
            }
            match self.socket_write(id, &TERMINATE_FRAME[offset..]) {
                WriteStatus::Done(n) => {
                    if let Some(chan) = self.channels.get_mut(&id) {
                        chan.terminate_offset += n;
                    }
                }
                WriteStatus::Blocked => return false,
                WriteStatus::Closed(reason) => {
                    self.hangout(id, &reason);
                    return false;
                }
            }
        }
        self.hangout(id, "terminated");
        true
    }

    /// Read everything available from channel `id` and relay complete frames
    pub(super) fn channel_read(&mut self, id: ChannelId) -> bool {
        loop {
            let Some(chan) = self.channels.get_mut(&id) else {
                return false;
            };
            if chan.is_disconnected {
                return false;
            }
            if chan.buf.tx_size() != 0 {
                // The peer has not consumed what was read last time
                return true;
            }

            let got_data = match chan.buf.fill_from(&mut chan.stream) {
                Ok(0) => {
                    self.hangout(id, "connection closed");
                    return false;
                }
                Ok(n) => {
                    trace!("{}: read {} bytes", id, n);
                    if chan.read_pending {
                        chan.read_pending = false;
                        apply_interest(&mut self.reactor, id, chan, Interest::Both);
                    }
                    true
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    chan.read_pending = true;
                    // A write still owed to this channel needs writable events
                    let interest = if chan.write_pending {
                        Interest::Both
                    } else {
                        Interest::Readable
                    };
                    apply_interest(&mut self.reactor, id, chan, interest);
                    if chan.buf.is_empty() {
                        return false;
                    }
                    false
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.hangout(id, &format!("read failed: {}", e));
                    return false;
                }
            };

            if let Scan::Stop(result) = self.scan_frames(id) {
                return result;
            }
            if !got_data {
                return false;
            }
        }
    }

    /// Act on every complete frame at the front of the buffer of `id`
    fn scan_frames(&mut self, id: ChannelId) -> Scan {
        let mut msg_start = 0;
        loop {
            let Some(chan) = self.channels.get_mut(&id) else {
                return Scan::Stop(false);
            };
            let available = chan.buf.rx_pos() - msg_start;
            if available < FRAME_HEADER_LEN {
                break;
            }
            let startup = chan.pool.is_none();
            let header = &chan.buf.received()[msg_start..];
            let msg_len = match if startup {
                startup_len(header)
            } else {
                frame_len(header)
            } {
                Ok(len) => len,
                Err(e) => {
                    warn!("Dropping {}: {}", id, e);
                    self.hangout(id, &e.to_string());
                    return Scan::Stop(false);
                }
            };
            if msg_len > self.settings.max_frame_size {
                warn!(
                    "Dropping {}: message of {} bytes exceeds the {} byte limit",
                    id, msg_len, self.settings.max_frame_size
                );
                self.hangout(id, "message too large");
                return Scan::Stop(false);
            }
            chan.buf.ensure_capacity(msg_start + msg_len);
            if available < msg_len {
                break;
            }
            let frame_end = msg_start + msg_len;

            if startup {
                match self.client_connect(id, msg_len) {
                    Connect::Pooled => {}
                    // A regular startup packet follows the refusal
                    Connect::Refused => continue,
                    Connect::Rejected => return Scan::Stop(false),
                }
                if let Some(result) = self.startup_attach(id, msg_len) {
                    return Scan::Stop(result);
                }
                // Queued; whatever followed the startup packet is now at the front
                continue;
            }

            let origin = if chan.is_client() {
                Origin::Client
            } else {
                Origin::Backend
            };
            match classify(origin, &chan.buf.received()[msg_start..frame_end]) {
                Marker::ReadyIdle => {
                    chan.backend_is_ready = true;
                    self.state.record_transaction();
                }
                Marker::Terminate => {
                    chan.is_interrupted = true;
                    let peer_tainted = self
                        .links
                        .peer_of(id)
                        .and_then(|peer| self.channels.get(&peer))
                        .is_some_and(|peer| peer.backend_is_tainted);
                    if !peer_tainted {
                        self.hangout(id, "client terminated");
                        return Scan::Stop(false);
                    }
                }
                Marker::SessionState => match origin {
                    Origin::Backend => {
                        chan.session_state_observed = true;
                        chan.backend_is_ready = false;
                    }
                    Origin::Client => chan.alters_session = true,
                },
                // Backend output after ReadyForQuery belongs to the next request
                Marker::Opaque if origin == Origin::Backend => chan.backend_is_ready = false,
                Marker::Opaque => {}
            }

            if self.links.peer_of(id).is_none() {
                if let Some(result) = self.attach_unpaired(id, frame_end) {
                    return Scan::Stop(result);
                }
            }
            msg_start = frame_end;
        }

        if msg_start != 0 {
            if let Some(chan) = self.channels.get_mut(&id) {
                chan.buf.set_tx_size(msg_start);
            }
            match self.links.peer_of(id) {
                Some(peer) => {
                    if !self.channel_write(peer, true) {
                        return Scan::Stop(false);
                    }
                }
                None => {
                    self.hangout(id, "peer vanished");
                    return Scan::Stop(false);
                }
            }
        }

        let reschedule = self
            .channels
            .get(&id)
            .is_some_and(|chan| chan.backend_is_ready && chan.buf.tx_size() == 0);
        if reschedule {
            return Scan::Stop(self.backend_reschedule(id, false));
        }
        Scan::Continue
    }

    /// Attach a client that just completed startup
    ///
    /// Returns `None` when the client was queued and scanning may go on.
    fn startup_attach(&mut self, id: ChannelId, packet_len: usize) -> Option<bool> {
        let attach = self.client_attach(id);
        let chan = self.channels.get_mut(&id)?;
        chan.buf.discard_front(packet_len);
        chan.awaiting_handshake = true;
        match attach {
            Attach::Existing(backend) | Attach::Spawned(backend) => {
                self.replay_handshake(backend, id);
                Some(self.channel_write(id, false))
            }
            Attach::Queued => None,
        }
    }

    /// Handle a complete frame from a channel without a peer
    ///
    /// Returns `Some` when the read loop must stop.
    fn attach_unpaired(&mut self, id: ChannelId, frame_end: usize) -> Option<bool> {
        let chan = self.channels.get(&id)?;
        if chan.is_backend() {
            self.hangout(id, "unexpected message from idle backend");
            return Some(false);
        }
        if chan.awaiting_handshake {
            self.hangout(id, "message before handshake completed");
            return Some(false);
        }
        if self.client_attach(id) == Attach::Queued {
            // Sent once a backend frees up
            self.channels.get_mut(&id)?.buf.set_tx_size(frame_end);
            return Some(false);
        }
        None
    }

    /// Load the cached handshake of `backend` for delivery to `client`
    pub(super) fn replay_handshake(&mut self, backend: ChannelId, client: ChannelId) {
        if let Some(chan) = self.channels.get_mut(&backend) {
            let handshake = chan.handshake_response.clone();
            chan.buf.load(&handshake);
            chan.backend_is_ready = true;
            debug!("Replaying handshake of backend {} to client {}", backend, client);
        }
        if let Some(chan) = self.channels.get_mut(&client) {
            chan.awaiting_handshake = false;
        }
    }

    /// Answer an SSL or GSS encryption request with a refusal
    pub(super) fn refuse_encryption(&mut self, id: ChannelId, request_len: usize) -> bool {
        if let Some(chan) = self.channels.get_mut(&id) {
            chan.buf.discard_front(request_len);
        }
        match self.socket_write(id, &[ENCRYPTION_REFUSED]) {
            WriteStatus::Done(_) => true,
            WriteStatus::Blocked => {
                self.hangout(id, "could not refuse encryption");
                false
            }
            WriteStatus::Closed(reason) => {
                self.hangout(id, &reason);
                false
            }
        }
    }
}
