//! In-memory reactor, streams and connector for driving a proxy in tests

use crate::backend::{BackendConnection, BackendConnector};
use crate::channel::ChannelId;
use crate::error::{ProxyError, Result};
use crate::pool::PoolKey;
use crate::protocol::write_frame;
use crate::reactor::{Interest, ProxyIo, Reactor, Readiness};
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MockState {
    /// Bytes the proxy will read
    pub inbound: VecDeque<u8>,
    /// Bytes the proxy wrote
    pub outbound: Vec<u8>,
    /// Reads return EOF once `inbound` is drained
    pub peer_closed: bool,
    /// Bytes accepted before writes block; unlimited when `None`
    pub write_budget: Option<usize>,
    /// Writes fail with a broken pipe
    pub fail_writes: bool,
    pub encrypted: bool,
}

/// Shared handle to a scripted socket
#[derive(Debug, Clone, Default)]
pub struct MockStream(Rc<RefCell<MockState>>);

impl MockStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, bytes: &[u8]) {
        self.0.borrow_mut().inbound.extend(bytes);
    }

    pub fn close(&self) {
        self.0.borrow_mut().peer_closed = true;
    }

    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.borrow_mut().outbound)
    }

    pub fn output(&self) -> Vec<u8> {
        self.0.borrow().outbound.clone()
    }

    pub fn set_write_budget(&self, budget: Option<usize>) {
        self.0.borrow_mut().write_budget = budget;
    }

    pub fn fail_writes(&self) {
        self.0.borrow_mut().fail_writes = true;
    }

    pub fn set_encrypted(&self) {
        self.0.borrow_mut().encrypted = true;
    }

    pub fn unread(&self) -> usize {
        self.0.borrow().inbound.len()
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.0.borrow_mut();
        if state.inbound.is_empty() {
            return if state.peer_closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.0.borrow_mut();
        if state.fail_writes {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let n = match state.write_budget {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(budget) => {
                let n = budget.min(buf.len());
                state.write_budget = Some(budget - n);
                n
            }
            None => buf.len(),
        };
        state.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ProxyIo for MockStream {
    fn is_encrypted(&self) -> bool {
        self.0.borrow().encrypted
    }
}

/// Reactor recording registrations; readiness is injected by the test
#[derive(Default)]
pub struct MockReactor {
    pub interests: HashMap<ChannelId, Interest>,
    pub history: Vec<(ChannelId, Interest)>,
    pub deregistered: usize,
    pub queue: VecDeque<Readiness<MockStream>>,
}

impl Reactor for MockReactor {
    type Stream = MockStream;

    fn register(&mut self, _: &mut MockStream, id: ChannelId, interest: Interest) -> io::Result<()> {
        self.interests.insert(id, interest);
        self.history.push((id, interest));
        Ok(())
    }

    fn reregister(
        &mut self,
        _: &mut MockStream,
        id: ChannelId,
        interest: Interest,
    ) -> io::Result<()> {
        self.interests.insert(id, interest);
        self.history.push((id, interest));
        Ok(())
    }

    fn deregister(&mut self, _: &mut MockStream) -> io::Result<()> {
        self.deregistered += 1;
        Ok(())
    }

    fn poll(
        &mut self,
        _: Option<Duration>,
        out: &mut Vec<Readiness<MockStream>>,
    ) -> io::Result<()> {
        out.extend(self.queue.drain(..));
        Ok(())
    }
}

/// Connector handing out scripted backend streams
#[derive(Default)]
pub struct MockConnector {
    pub spawned: Vec<MockStream>,
    pub fail: bool,
    pub next_pid: i32,
}

impl MockConnector {
    pub fn new() -> Self {
        MockConnector {
            next_pid: 1000,
            ..Default::default()
        }
    }
}

/// Handshake an engine sends to a trusted login with process id `pid`
pub fn handshake(pid: i32) -> Vec<u8> {
    let mut out = Vec::new();
    write_frame(&mut out, b'R', &0i32.to_be_bytes());
    write_frame(&mut out, b'S', b"client_encoding\0UTF8\0");
    let mut key_data = pid.to_be_bytes().to_vec();
    key_data.extend_from_slice(&7i32.to_be_bytes());
    write_frame(&mut out, b'K', &key_data);
    write_frame(&mut out, b'Z', b"I");
    out
}

impl BackendConnector for MockConnector {
    type Stream = MockStream;

    fn connect(&mut self, key: &PoolKey) -> Result<BackendConnection<MockStream>> {
        if self.fail {
            return Err(ProxyError::Backend(format!("engine for {} is down", key)));
        }
        let pid = self.next_pid;
        self.next_pid += 1;
        let stream = MockStream::new();
        self.spawned.push(stream.clone());
        Ok(BackendConnection {
            stream,
            handshake_response: Bytes::from(handshake(pid)),
        })
    }
}
