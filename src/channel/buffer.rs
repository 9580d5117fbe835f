//! Cursor-tracked relay buffer
//!
//! ```text
//! 0        tx_pos        tx_size        rx_pos        capacity
//! |  sent   |  to be sent  |  received,    |    free     |
//! |         |              |  not framed   |             |
//! ```
//!
//! Bytes are appended at `rx_pos` by reads. Once complete frames are found,
//! `tx_size` marks how much of the buffer the peer should write out, and the
//! peer advances `tx_pos` as its writes succeed.

use std::io::{self, Read};

/// Growable byte buffer shared between a channel's reads and its peer's writes
#[derive(Debug, Default)]
pub struct ChannelBuffer {
    data: Vec<u8>,
    rx_pos: usize,
    tx_pos: usize,
    tx_size: usize,
}

impl ChannelBuffer {
    /// Create a buffer with `capacity` bytes preallocated
    pub fn with_capacity(capacity: usize) -> Self {
        ChannelBuffer {
            data: vec![0; capacity],
            ..Default::default()
        }
    }

    /// Read once from `reader` into the free tail, growing when full
    pub fn fill_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        if self.rx_pos == self.data.len() {
            let grown = (self.data.len() * 2).max(64);
            self.data.resize(grown, 0);
        }
        let n = reader.read(&mut self.data[self.rx_pos..])?;
        self.rx_pos += n;
        Ok(n)
    }

    /// Make room for at least `len` bytes counted from the start of the buffer
    pub fn ensure_capacity(&mut self, len: usize) {
        if self.data.len() < len {
            self.data.resize(len, 0);
        }
    }

    /// Received bytes not yet consumed by framing or the peer
    pub fn received(&self) -> &[u8] {
        &self.data[..self.rx_pos]
    }

    /// Number of received bytes
    pub fn rx_pos(&self) -> usize {
        self.rx_pos
    }

    /// Number of bytes offered to the peer
    pub fn tx_size(&self) -> usize {
        self.tx_size
    }

    /// Current buffer capacity
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Offer the first `size` received bytes to the peer
    pub fn set_tx_size(&mut self, size: usize) {
        debug_assert!(size <= self.rx_pos);
        self.tx_size = size;
    }

    /// Offered bytes the peer has not written yet
    pub fn pending_tx(&self) -> &[u8] {
        &self.data[self.tx_pos..self.tx_size]
    }

    /// Record `n` bytes written by the peer
    pub fn advance_tx(&mut self, n: usize) {
        self.tx_pos += n;
        debug_assert!(self.tx_pos <= self.tx_size);
    }

    /// Drop the fully written prefix and shift any remaining bytes to the front
    pub fn complete_tx(&mut self) {
        let sent = self.tx_size;
        if sent < self.rx_pos {
            self.data.copy_within(sent..self.rx_pos, 0);
        }
        self.rx_pos -= sent;
        self.tx_pos = 0;
        self.tx_size = 0;
    }

    /// Replace the content with `bytes`, all offered to the peer
    pub fn load(&mut self, bytes: &[u8]) {
        self.ensure_capacity(bytes.len());
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.rx_pos = bytes.len();
        self.tx_pos = 0;
        self.tx_size = bytes.len();
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.rx_pos = 0;
        self.tx_pos = 0;
        self.tx_size = 0;
    }

    /// Remove `n` leading bytes that were never offered to the peer
    pub fn discard_front(&mut self, n: usize) {
        debug_assert!(self.tx_size == 0 && n <= self.rx_pos);
        self.data.copy_within(n..self.rx_pos, 0);
        self.rx_pos -= n;
    }

    /// True when nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.rx_pos == 0
    }
}
