//! Test utilities and mocks for Poolrat
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use poolrat::protocol::{startup_packet, write_frame};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Test configuration builder
pub struct TestConfigBuilder {
    engine_port: u16,
    workers: usize,
    max_backends: usize,
    admin_addr: Option<String>,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        TestConfigBuilder {
            engine_port: 5432,
            workers: 1,
            max_backends: 1,
            admin_addr: None,
        }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set engine port
    pub fn engine_port(mut self, port: u16) -> Self {
        self.engine_port = port;
        self
    }

    /// Set worker count
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set backends per pool
    pub fn max_backends(mut self, max: usize) -> Self {
        self.max_backends = max;
        self
    }

    /// Enable the admin listener
    pub fn admin_addr(mut self, addr: &str) -> Self {
        self.admin_addr = Some(addr.to_string());
        self
    }

    /// Build the configuration
    pub fn build(self) -> poolrat::config::Config {
        let mut config = poolrat::config::Config::default();
        config.proxy.listen_addr = "127.0.0.1:0".to_string();
        config.proxy.admin_addr = self.admin_addr;
        config.proxy.workers = self.workers;
        config.proxy.wait_timeout_ms = 20;
        config.pool.max_backends = self.max_backends;
        config.pool.buffer_size = 256;
        config.backend.host = "127.0.0.1".to_string();
        config.backend.port = self.engine_port;
        config.backend.connect_timeout = 2;
        config
    }
}

/// Engine process id reported for the n-th accepted session
pub fn engine_pid(n: usize) -> i32 {
    4000 + n as i32
}

/// Minimal engine: trusts every login and answers each query with its text
pub struct FakeEngine {
    addr: SocketAddr,
    sessions: Arc<AtomicUsize>,
}

impl FakeEngine {
    /// Start serving on an ephemeral port
    pub fn start() -> Self {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let sessions = Arc::new(AtomicUsize::new(0));

        let counter = sessions.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                std::thread::spawn(move || serve_session(stream, engine_pid(n)));
            }
        });

        FakeEngine { addr, sessions }
    }

    /// Listening port
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Sessions opened so far
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

fn read_exact_vec(stream: &mut StdTcpStream, len: usize) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).ok()?;
    Some(buf)
}

fn serve_session(mut stream: StdTcpStream, pid: i32) {
    let Some(len) = read_exact_vec(&mut stream, 4) else {
        return;
    };
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if read_exact_vec(&mut stream, len - 4).is_none() {
        return;
    }
    if stream.write_all(&engine_handshake(pid)).is_err() {
        return;
    }

    loop {
        let Some(header) = read_exact_vec(&mut stream, 5) else {
            return;
        };
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let Some(payload) = read_exact_vec(&mut stream, len - 4) else {
            return;
        };
        match header[0] {
            b'X' => return,
            b'Q' => {
                let mut reply = Vec::new();
                write_frame(&mut reply, b'C', &payload);
                write_frame(&mut reply, b'Z', b"I");
                if stream.write_all(&reply).is_err() {
                    return;
                }
            }
            _ => {}
        }
    }
}

/// Handshake the fake engine sends after a startup packet
pub fn engine_handshake(pid: i32) -> Vec<u8> {
    let mut out = Vec::new();
    write_frame(&mut out, b'R', &0i32.to_be_bytes());
    write_frame(&mut out, b'S', b"server_version\x0016.0\0");
    let mut key_data = pid.to_be_bytes().to_vec();
    key_data.extend_from_slice(&99i32.to_be_bytes());
    write_frame(&mut out, b'K', &key_data);
    write_frame(&mut out, b'Z', b"I");
    out
}

/// Mock client side of the wire protocol
pub mod client_mock {
    use super::*;

    /// Startup packet for `user` on `database`
    pub fn create_startup(user: &str, database: &str) -> Vec<u8> {
        startup_packet(&[("user", user), ("database", database)])
    }

    /// Simple query frame
    pub fn create_query(sql: &str) -> Vec<u8> {
        let mut payload = sql.as_bytes().to_vec();
        payload.push(0);
        let mut out = Vec::new();
        write_frame(&mut out, b'Q', &payload);
        out
    }

    /// Read one regular frame
    pub async fn read_message(stream: &mut TcpStream) -> (u8, Vec<u8>) {
        let mut header = [0u8; 5];
        stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut payload = vec![0u8; len - 4];
        stream.read_exact(&mut payload).await.unwrap();
        (header[0], payload)
    }

    /// Read frames up to and including ReadyForQuery
    pub async fn read_until_ready(stream: &mut TcpStream) -> Vec<(u8, Vec<u8>)> {
        let mut frames = Vec::new();
        loop {
            let frame = read_message(stream).await;
            let done = frame.0 == b'Z';
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    /// Connect and log in, returning the stream and the handshake frames
    pub async fn login(addr: SocketAddr, user: &str, database: &str) -> (TcpStream, Vec<(u8, Vec<u8>)>) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&create_startup(user, database))
            .await
            .unwrap();
        let frames = read_until_ready(&mut stream).await;
        (stream, frames)
    }

    /// Backend pid carried by a handshake
    pub fn pid_of(frames: &[(u8, Vec<u8>)]) -> Option<i32> {
        frames
            .iter()
            .find(|(tag, payload)| *tag == b'K' && payload.len() >= 4)
            .map(|(_, p)| i32::from_be_bytes([p[0], p[1], p[2], p[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_test_listener() {
        let (listener, addr) = create_test_listener().await;
        assert!(addr.port() > 0);
        drop(listener);
    }

    #[test]
    fn test_config_builder() {
        let config = TestConfigBuilder::new()
            .engine_port(6000)
            .workers(3)
            .max_backends(2)
            .build();

        assert_eq!(config.backend.port, 6000);
        assert_eq!(config.proxy.workers, 3);
        assert_eq!(config.pool.max_backends, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_handshake_ends_ready() {
        let hs = engine_handshake(7);
        assert_eq!(hs[0], b'R');
        assert_eq!(&hs[hs.len() - 6..], &[b'Z', 0, 0, 0, 5, b'I']);
    }
}
