//! Backend module for Poolrat
//!
//! Opens pooled sessions to the database engine. The connection is made and
//! authenticated synchronously with a bounded timeout, then switched to
//! non-blocking mode and handed to the proxy worker.

use crate::config::BackendConfig;
use crate::error::{ProxyError, Result};
use crate::helper::{duration_from_secs, SocketOpts, MAX_FRAME_SIZE};
use crate::pool::PoolKey;
use crate::protocol::consts::*;
use crate::protocol::{
    auth_code, auth_data, error_message, frame_len, md5_password, password_message,
    sasl_initial_response, sasl_mechanisms, sasl_response, startup_message, ScramClient,
};
use crate::reactor::ProxyStream;
use bytes::{Bytes, BytesMut};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tracing::{debug, info};

/// A freshly opened backend session
#[derive(Debug)]
pub struct BackendConnection<S> {
    /// Non-blocking stream to the engine
    pub stream: S,
    /// Frames from AuthenticationOk through the first ReadyForQuery
    pub handshake_response: Bytes,
}

/// Opens backend sessions for a pool
pub trait BackendConnector {
    /// Stream type of opened sessions
    type Stream;

    /// Open and authenticate a session for `key`
    fn connect(&mut self, key: &PoolKey) -> Result<BackendConnection<Self::Stream>>;
}

/// Connector talking to a real engine over TCP or a Unix socket
#[derive(Debug, Clone)]
pub struct EngineConnector {
    config: BackendConfig,
}

impl EngineConnector {
    /// Create a connector for the configured engine
    pub fn new(config: BackendConfig) -> Self {
        EngineConnector { config }
    }

    fn timeout(&self) -> Duration {
        duration_from_secs(self.config.connect_timeout)
    }

    fn connect_tcp(&self) -> Result<TcpStream> {
        let addr = self.config.tcp_addr();
        let mut last_err = None;
        for sock_addr in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&sock_addr, self.timeout()) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => ProxyError::Backend(format!("Failed to connect to {}: {}", addr, e)),
            None => ProxyError::Backend(format!("No addresses resolved for {}", addr)),
        })
    }
}

impl BackendConnector for EngineConnector {
    type Stream = ProxyStream;

    fn connect(&mut self, key: &PoolKey) -> Result<BackendConnection<ProxyStream>> {
        let timeout = Some(self.timeout());
        let password = self.config.password.as_deref();
        let app = self.config.application_name.as_str();

        let (stream, handshake_response) = match self.config.unix_socket_path() {
            Some(path) => {
                let mut stream = UnixStream::connect(&path).map_err(|e| {
                    ProxyError::Backend(format!("Failed to connect to {:?}: {}", path, e))
                })?;
                stream.set_read_timeout(timeout)?;
                stream.set_write_timeout(timeout)?;
                let handshake = handshake(&mut stream, key, app, password)?;
                stream.set_read_timeout(None)?;
                stream.set_write_timeout(None)?;
                (ProxyStream::from_std_unix(stream)?, handshake)
            }
            None => {
                let mut stream = self.connect_tcp()?;
                SocketOpts::from_tcp_config(&self.config.tcp).apply(&stream)?;
                stream.set_read_timeout(timeout)?;
                stream.set_write_timeout(timeout)?;
                let handshake = handshake(&mut stream, key, app, password)?;
                stream.set_read_timeout(None)?;
                stream.set_write_timeout(None)?;
                (ProxyStream::from_std_tcp(stream)?, handshake)
            }
        };

        info!("Opened backend session for {}", key);
        Ok(BackendConnection {
            stream,
            handshake_response,
        })
    }
}

/// Log into the engine as `key.user` and capture the handshake response
pub fn handshake<S: Read + Write>(
    stream: &mut S,
    key: &PoolKey,
    application_name: &str,
    password: Option<&str>,
) -> Result<Bytes> {
    stream.write_all(&startup_message(&key.user, &key.database, application_name))?;

    let mut captured = BytesMut::new();
    let mut authenticated = false;
    let mut scram: Option<ScramClient> = None;
    loop {
        let frame = read_frame(stream)?;
        match frame[0] {
            TAG_AUTHENTICATION => {
                let code = auth_code(&frame)
                    .ok_or_else(|| ProxyError::Protocol("short authentication request".into()))?;
                match code {
                    AUTH_OK => {
                        authenticated = true;
                        captured.extend_from_slice(&frame);
                    }
                    AUTH_CLEARTEXT_PASSWORD => {
                        let password = require_password(password)?;
                        stream.write_all(&password_message(password))?;
                    }
                    AUTH_MD5_PASSWORD => {
                        let password = require_password(password)?;
                        let salt = frame.get(FRAME_HEADER_LEN + 4..FRAME_HEADER_LEN + 8).ok_or_else(
                            || ProxyError::Protocol("MD5 request without salt".into()),
                        )?;
                        let hashed = md5_password(&key.user, password, salt);
                        stream.write_all(&password_message(&hashed))?;
                    }
                    AUTH_SASL => {
                        let mechanisms = sasl_mechanisms(&frame);
                        if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
                            return Err(ProxyError::Backend(format!(
                                "no supported SASL mechanism in {:?}",
                                mechanisms
                            )));
                        }
                        let password = require_password(password)?;
                        let client = ScramClient::new(password);
                        stream.write_all(&sasl_initial_response(
                            SCRAM_SHA_256,
                            client.client_first().as_bytes(),
                        ))?;
                        debug!("Started {} exchange for {}", SCRAM_SHA_256, key);
                        scram = Some(client);
                    }
                    AUTH_SASL_CONTINUE => {
                        let client = scram.as_mut().ok_or_else(|| {
                            ProxyError::Protocol("SASL challenge without an exchange".into())
                        })?;
                        let server_first = sasl_text(&frame)?;
                        let client_final = client.client_final(server_first)?;
                        stream.write_all(&sasl_response(client_final.as_bytes()))?;
                    }
                    AUTH_SASL_FINAL => {
                        let client = scram.take().ok_or_else(|| {
                            ProxyError::Protocol("SASL outcome without an exchange".into())
                        })?;
                        client.verify_server_final(sasl_text(&frame)?)?;
                    }
                    other => {
                        return Err(ProxyError::Backend(format!(
                            "unsupported authentication method {}",
                            other
                        )))
                    }
                }
            }
            TAG_ERROR_RESPONSE => return Err(ProxyError::Backend(error_message(&frame))),
            TAG_READY_FOR_QUERY if authenticated => {
                captured.extend_from_slice(&frame);
                debug!("Handshake with engine complete ({} bytes)", captured.len());
                return Ok(captured.freeze());
            }
            tag if authenticated => {
                debug!("Handshake frame '{}'", char::from(tag));
                captured.extend_from_slice(&frame);
            }
            tag => {
                return Err(ProxyError::Protocol(format!(
                    "unexpected message '{}' before authentication",
                    char::from(tag)
                )))
            }
        }
    }
}

fn require_password(password: Option<&str>) -> Result<&str> {
    password.ok_or_else(|| {
        ProxyError::Backend("engine requested a password but none is configured".into())
    })
}

fn sasl_text(frame: &[u8]) -> Result<&str> {
    std::str::from_utf8(auth_data(frame))
        .map_err(|_| ProxyError::Protocol("SASL data is not UTF-8".into()))
}

fn read_frame<S: Read>(stream: &mut S) -> Result<Vec<u8>> {
    let mut frame = vec![0u8; FRAME_HEADER_LEN];
    stream.read_exact(&mut frame)?;
    let len = frame_len(&frame)?;
    if len > MAX_FRAME_SIZE {
        return Err(ProxyError::Protocol(format!("engine message of {} bytes", len)));
    }
    frame.resize(len, 0);
    stream.read_exact(&mut frame[FRAME_HEADER_LEN..])?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{backend_pid, write_frame};
    use std::io::Cursor;

    /// In-memory engine: scripted replies, captured requests
    struct ScriptedEngine {
        replies: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl ScriptedEngine {
        fn new(frames: &[(u8, Vec<u8>)]) -> Self {
            let mut replies = Vec::new();
            for (tag, payload) in frames {
                write_frame(&mut replies, *tag, payload);
            }
            ScriptedEngine {
                replies: Cursor::new(replies),
                sent: Vec::new(),
            }
        }
    }

    impl Read for ScriptedEngine {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.replies.read(buf)
        }
    }

    impl Write for ScriptedEngine {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn key_data(pid: i32) -> Vec<u8> {
        let mut v = pid.to_be_bytes().to_vec();
        v.extend_from_slice(&1i32.to_be_bytes());
        v
    }

    #[test]
    fn test_trust_handshake_captured() {
        let mut engine = ScriptedEngine::new(&[
            (b'R', 0i32.to_be_bytes().to_vec()),
            (b'S', b"server_version\x0016.0\0".to_vec()),
            (b'K', key_data(31337)),
            (b'Z', b"I".to_vec()),
        ]);
        let key = PoolKey::new("db", "alice");

        let hs = handshake(&mut engine, &key, "pool_worker", None).unwrap();
        assert_eq!(backend_pid(&hs), Some(31337));
        assert_eq!(hs[0], b'R');
        assert_eq!(hs[hs.len() - 6], b'Z');
        // Only the startup packet was sent
        assert_eq!(engine.sent, startup_message("alice", "db", "pool_worker"));
    }

    #[test]
    fn test_md5_handshake_sends_hashed_password() {
        let mut md5_req = 5i32.to_be_bytes().to_vec();
        md5_req.extend_from_slice(&[9, 8, 7, 6]);
        let mut engine = ScriptedEngine::new(&[
            (b'R', md5_req),
            (b'R', 0i32.to_be_bytes().to_vec()),
            (b'K', key_data(5)),
            (b'Z', b"I".to_vec()),
        ]);
        let key = PoolKey::new("db", "bob");

        let hs = handshake(&mut engine, &key, "app", Some("pw")).unwrap();
        // The MD5 request itself is not part of the replayed handshake
        assert_eq!(auth_code(&hs), Some(AUTH_OK));

        let startup_len = startup_message("bob", "db", "app").len();
        let expected = password_message(&md5_password("bob", "pw", &[9, 8, 7, 6]));
        assert_eq!(&engine.sent[startup_len..], &expected[..]);
    }

    #[test]
    fn test_cleartext_without_password_fails() {
        let mut engine = ScriptedEngine::new(&[(b'R', 3i32.to_be_bytes().to_vec())]);
        let err = handshake(&mut engine, &PoolKey::new("db", "u"), "app", None).unwrap_err();
        assert!(matches!(err, ProxyError::Backend(_)));
    }

    #[test]
    fn test_unsupported_auth_method() {
        // GSSAPI
        let mut engine = ScriptedEngine::new(&[(b'R', 7i32.to_be_bytes().to_vec())]);
        let err = handshake(&mut engine, &PoolKey::new("db", "u"), "app", None).unwrap_err();
        assert!(err.to_string().contains("unsupported authentication method 7"));
    }

    fn sasl_request(mechanisms: &[&str]) -> Vec<u8> {
        let mut payload = AUTH_SASL.to_be_bytes().to_vec();
        for m in mechanisms {
            payload.extend_from_slice(m.as_bytes());
            payload.push(0);
        }
        payload.push(0);
        payload
    }

    fn sasl_step(code: i32, data: &str) -> Vec<u8> {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(data.as_bytes());
        payload
    }

    #[test]
    fn test_sasl_without_scram_mechanism() {
        let mut engine = ScriptedEngine::new(&[(b'R', sasl_request(&["SCRAM-SHA-256-PLUS"]))]);
        let err = handshake(&mut engine, &PoolKey::new("db", "u"), "app", Some("pw")).unwrap_err();
        assert!(err.to_string().contains("no supported SASL mechanism"));
    }

    #[test]
    fn test_sasl_without_password_fails() {
        let mut engine = ScriptedEngine::new(&[(b'R', sasl_request(&[SCRAM_SHA_256]))]);
        let err = handshake(&mut engine, &PoolKey::new("db", "u"), "app", None).unwrap_err();
        assert!(matches!(err, ProxyError::Backend(_)));
    }

    #[test]
    fn test_sasl_foreign_nonce_rejected() {
        let mut engine = ScriptedEngine::new(&[
            (b'R', sasl_request(&[SCRAM_SHA_256])),
            (
                b'R',
                sasl_step(AUTH_SASL_CONTINUE, "r=forged,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096"),
            ),
        ]);
        let err = handshake(&mut engine, &PoolKey::new("db", "u"), "app", Some("pw")).unwrap_err();
        assert!(err.to_string().contains("nonce mismatch"));

        let startup_len = startup_message("u", "db", "app").len();
        let initial = &engine.sent[startup_len..];
        assert_eq!(initial[0], b'p');
        let body = &initial[FRAME_HEADER_LEN..];
        assert!(body.starts_with(b"SCRAM-SHA-256\0"));
        assert_eq!(&body[18..26], b"n,,n=,r=");
    }

    #[test]
    fn test_sasl_outcome_without_exchange() {
        let mut engine = ScriptedEngine::new(&[(b'R', sasl_step(AUTH_SASL_FINAL, "v=AAAA"))]);
        let err = handshake(&mut engine, &PoolKey::new("db", "u"), "app", Some("pw")).unwrap_err();
        assert!(matches!(err, ProxyError::Protocol(_)));
    }

    /// Engine side of a SCRAM exchange run on a socket pair
    fn scram_engine(mut stream: UnixStream, forge_signature: bool) {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).unwrap();
        let mut startup = vec![0u8; u32::from_be_bytes(len) as usize - 4];
        stream.read_exact(&mut startup).unwrap();

        let mut out = Vec::new();
        write_frame(&mut out, b'R', &sasl_request(&[SCRAM_SHA_256]));
        stream.write_all(&out).unwrap();

        let initial = read_frame(&mut stream).unwrap();
        let mechanism_end = FRAME_HEADER_LEN + SCRAM_SHA_256.len() + 1;
        let client_first = std::str::from_utf8(&initial[mechanism_end + 4..]).unwrap();
        let nonce = client_first.strip_prefix("n,,n=,r=").unwrap().to_string();
        let server_first = format!("r={}srv,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096", nonce);
        let mut out = Vec::new();
        write_frame(&mut out, b'R', &sasl_step(AUTH_SASL_CONTINUE, &server_first));
        stream.write_all(&out).unwrap();

        let mut expected = ScramClient::with_fixed_nonce("", "pencil", &nonce);
        let expected_final = expected.client_final(&server_first).unwrap();
        let response = read_frame(&mut stream).unwrap();
        assert_eq!(&response[FRAME_HEADER_LEN..], expected_final.as_bytes());

        let server_final = if forge_signature {
            "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=".to_string()
        } else {
            expected.server_final().unwrap()
        };
        let mut out = Vec::new();
        write_frame(&mut out, b'R', &sasl_step(AUTH_SASL_FINAL, &server_final));
        write_frame(&mut out, b'R', &0i32.to_be_bytes());
        write_frame(&mut out, b'K', &key_data(77));
        write_frame(&mut out, b'Z', b"I");
        let _ = stream.write_all(&out);
    }

    #[test]
    fn test_scram_handshake_completes() {
        let (mut ours, theirs) = UnixStream::pair().unwrap();
        let engine = std::thread::spawn(move || scram_engine(theirs, false));

        let hs = handshake(&mut ours, &PoolKey::new("db", "u"), "app", Some("pencil")).unwrap();
        engine.join().unwrap();
        assert_eq!(auth_code(&hs), Some(AUTH_OK));
        assert_eq!(backend_pid(&hs), Some(77));
    }

    #[test]
    fn test_scram_forged_server_signature() {
        let (mut ours, theirs) = UnixStream::pair().unwrap();
        let engine = std::thread::spawn(move || scram_engine(theirs, true));

        let err =
            handshake(&mut ours, &PoolKey::new("db", "u"), "app", Some("pencil")).unwrap_err();
        engine.join().unwrap();
        assert!(err.to_string().contains("signature mismatch"));
    }

    #[test]
    fn test_error_response_reported() {
        let mut engine = ScriptedEngine::new(&[(
            b'E',
            b"SFATAL\0C3D000\0Mdatabase \"nope\" does not exist\0\0".to_vec(),
        )]);
        let err = handshake(&mut engine, &PoolKey::new("nope", "u"), "app", None).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_oversized_handshake_message_rejected() {
        let mut engine = ScriptedEngine::new(&[]);
        engine.replies = Cursor::new(vec![b'R', 0x7f, 0xff, 0xff, 0xff]);
        let err = handshake(&mut engine, &PoolKey::new("db", "u"), "app", None).unwrap_err();
        assert!(matches!(err, ProxyError::Protocol(_)));
    }

    #[test]
    fn test_truncated_handshake_is_io_error() {
        let mut engine = ScriptedEngine::new(&[(b'R', 0i32.to_be_bytes().to_vec())]);
        let err = handshake(&mut engine, &PoolKey::new("db", "u"), "app", None).unwrap_err();
        assert!(matches!(err, ProxyError::Io(_)));
    }

    #[test]
    fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut connector = EngineConnector::new(BackendConfig {
            port,
            connect_timeout: 1,
            ..Default::default()
        });
        assert!(connector.connect(&PoolKey::new("db", "u")).is_err());
    }
}
