//! mio based reactor

use super::handoff::{into_stream, recv_socket};
use super::{Interest, ProxyStream, Reactor, Readiness};
use crate::channel::ChannelId;
use crate::helper::MAX_READY_EVENTS;
use mio::net::UnixStream;
use mio::{Events, Poll, Token};
use std::io;
use std::time::Duration;
use tracing::{debug, warn};

/// Token reserved for the hand-off socket; channel ids start at 1
const CONTROL: Token = Token(0);

/// Edge-triggered reactor over `mio::Poll`
///
/// Optionally watches a hand-off socket and turns every descriptor received
/// on it into [`Readiness::Accepted`].
pub struct MioReactor {
    poll: Poll,
    events: Events,
    control: Option<UnixStream>,
}

impl MioReactor {
    /// Create a reactor without a hand-off socket
    pub fn new() -> io::Result<Self> {
        Ok(MioReactor {
            poll: Poll::new()?,
            events: Events::with_capacity(MAX_READY_EVENTS),
            control: None,
        })
    }

    /// Create a reactor receiving client sockets over `control`
    pub fn with_control(control: std::os::unix::net::UnixStream) -> io::Result<Self> {
        let mut reactor = Self::new()?;
        control.set_nonblocking(true)?;
        let mut control = UnixStream::from_std(control);
        reactor
            .poll
            .registry()
            .register(&mut control, CONTROL, mio::Interest::READABLE)?;
        reactor.control = Some(control);
        Ok(reactor)
    }

    fn accept_handoffs(&mut self, out: &mut Vec<Readiness<ProxyStream>>) {
        loop {
            let Some(control) = self.control.as_ref() else {
                return;
            };
            match recv_socket(control) {
                Ok(Some(fd)) => match into_stream(fd) {
                    Ok(stream) => out.push(Readiness::Accepted(stream)),
                    Err(e) => warn!("Failed to adopt client socket: {}", e),
                },
                Ok(None) => {
                    warn!("Hand-off socket closed, no more clients will arrive");
                    if let Some(mut control) = self.control.take() {
                        let _ = self.poll.registry().deregister(&mut control);
                    }
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed to receive client socket: {}", e);
                    return;
                }
            }
        }
    }
}

fn mio_interest(interest: Interest) -> mio::Interest {
    match interest {
        Interest::Readable => mio::Interest::READABLE,
        Interest::Writable => mio::Interest::WRITABLE,
        Interest::Both => mio::Interest::READABLE | mio::Interest::WRITABLE,
    }
}

fn token(id: ChannelId) -> Token {
    Token(id.0 as usize)
}

impl Reactor for MioReactor {
    type Stream = ProxyStream;

    fn register(
        &mut self,
        stream: &mut ProxyStream,
        id: ChannelId,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll
            .registry()
            .register(stream, token(id), mio_interest(interest))
    }

    fn reregister(
        &mut self,
        stream: &mut ProxyStream,
        id: ChannelId,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(stream, token(id), mio_interest(interest))
    }

    fn deregister(&mut self, stream: &mut ProxyStream) -> io::Result<()> {
        self.poll.registry().deregister(stream)
    }

    fn poll(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<Readiness<ProxyStream>>,
    ) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut control_ready = false;
        for event in self.events.iter() {
            if event.token() == CONTROL {
                control_ready = true;
                continue;
            }
            let readable = event.is_readable() || event.is_read_closed() || event.is_error();
            let writable = event.is_writable() || event.is_write_closed();
            debug!(
                "Event on channel {}: readable={} writable={}",
                event.token().0,
                readable,
                writable
            );
            out.push(Readiness::Channel {
                id: ChannelId(event.token().0 as u64),
                readable,
                writable,
            });
        }

        if control_ready {
            self.accept_handoffs(out);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::handoff::send_socket;
    use super::*;
    use std::io::Write;

    #[test]
    fn test_readable_event_for_registered_stream() {
        let mut reactor = MioReactor::new().unwrap();
        let (a, mut b) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut stream = ProxyStream::from_std_unix(a).unwrap();
        reactor
            .register(&mut stream, ChannelId(7), Interest::Readable)
            .unwrap();

        b.write_all(b"x").unwrap();
        let mut out = Vec::new();
        reactor
            .poll(Some(Duration::from_secs(1)), &mut out)
            .unwrap();

        assert!(out.iter().any(|r| matches!(
            r,
            Readiness::Channel {
                id: ChannelId(7),
                readable: true,
                ..
            }
        )));
    }

    #[test]
    fn test_handoff_produces_accepted_stream() {
        let (tx, rx) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut reactor = MioReactor::with_control(rx).unwrap();

        let (client, _keep) = std::os::unix::net::UnixStream::pair().unwrap();
        send_socket(&tx, &client).unwrap();
        drop(client);

        let mut out = Vec::new();
        for _ in 0..10 {
            reactor
                .poll(Some(Duration::from_millis(200)), &mut out)
                .unwrap();
            if !out.is_empty() {
                break;
            }
        }
        assert!(matches!(out.first(), Some(Readiness::Accepted(ProxyStream::Unix(_)))));
    }
}
