//! Concrete socket stream used by production workers

use super::ProxyIo;
use mio::event::Source;
use mio::net::{TcpStream, UnixStream};
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};

/// A non-blocking TCP or Unix stream
#[derive(Debug)]
pub enum ProxyStream {
    /// TCP connection
    Tcp(TcpStream),
    /// Unix domain socket connection
    Unix(UnixStream),
}

impl ProxyStream {
    /// Wrap a connected std TCP stream, switching it to non-blocking mode
    pub fn from_std_tcp(stream: std::net::TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(ProxyStream::Tcp(TcpStream::from_std(stream)))
    }

    /// Wrap a connected std Unix stream, switching it to non-blocking mode
    pub fn from_std_unix(stream: std::os::unix::net::UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(ProxyStream::Unix(UnixStream::from_std(stream)))
    }
}

impl Read for ProxyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ProxyStream::Tcp(s) => s.read(buf),
            ProxyStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for ProxyStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ProxyStream::Tcp(s) => s.write(buf),
            ProxyStream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ProxyStream::Tcp(s) => s.flush(),
            ProxyStream::Unix(s) => s.flush(),
        }
    }
}

impl ProxyIo for ProxyStream {}

impl Source for ProxyStream {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self {
            ProxyStream::Tcp(s) => s.register(registry, token, interests),
            ProxyStream::Unix(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self {
            ProxyStream::Tcp(s) => s.reregister(registry, token, interests),
            ProxyStream::Unix(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            ProxyStream::Tcp(s) => s.deregister(registry),
            ProxyStream::Unix(s) => s.deregister(registry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_stream_roundtrip() {
        let (a, b) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut a = ProxyStream::from_std_unix(a).unwrap();
        let mut b = ProxyStream::from_std_unix(b).unwrap();

        a.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        // Unix socket pairs deliver immediately within the same process
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert!(!b.is_encrypted());
    }

    #[test]
    fn test_nonblocking_read_would_block() {
        let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut a = ProxyStream::from_std_unix(a).unwrap();
        let mut buf = [0u8; 4];
        let err = a.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
