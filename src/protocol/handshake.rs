//! Backend handshake helpers
//!
//! Message builders and inspectors used while the proxy logs into the engine
//! on behalf of a pool.

use super::consts::*;
use super::frame::{frames, read_i32, write_frame};
use super::startup::startup_packet;
use md5::{Digest, Md5};

/// Startup packet the proxy sends when it opens a pooled backend session
pub fn startup_message(user: &str, database: &str, application_name: &str) -> Vec<u8> {
    startup_packet(&[
        ("user", user),
        ("database", database),
        ("application_name", application_name),
    ])
}

/// PasswordMessage carrying `password`
pub fn password_message(password: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(password.len() + 1);
    payload.extend_from_slice(password.as_bytes());
    payload.push(0);

    let mut out = Vec::new();
    write_frame(&mut out, TAG_PASSWORD, &payload);
    out
}

/// SASLInitialResponse selecting `mechanism`
pub fn sasl_initial_response(mechanism: &str, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(mechanism.len() + 5 + data.len());
    payload.extend_from_slice(mechanism.as_bytes());
    payload.push(0);
    payload.extend_from_slice(&(data.len() as i32).to_be_bytes());
    payload.extend_from_slice(data);

    let mut out = Vec::new();
    write_frame(&mut out, TAG_PASSWORD, &payload);
    out
}

/// SASLResponse carrying `data`
pub fn sasl_response(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    write_frame(&mut out, TAG_PASSWORD, data);
    out
}

/// Data following the code of an `'R'` frame
pub fn auth_data(frame: &[u8]) -> &[u8] {
    frame.get(FRAME_HEADER_LEN + 4..).unwrap_or_default()
}

/// Mechanism names listed by an AuthenticationSASL request
pub fn sasl_mechanisms(frame: &[u8]) -> Vec<String> {
    auth_data(frame)
        .split(|b| *b == 0)
        .take_while(|name| !name.is_empty())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect()
}

/// MD5 response: `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, password: &str, salt: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(user.as_bytes());
    let inner = format!("{:x}", hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);
    format!("md5{:x}", hasher.finalize())
}

/// Authentication request code of an `'R'` frame
pub fn auth_code(frame: &[u8]) -> Option<i32> {
    if frame.first() != Some(&TAG_AUTHENTICATION) || frame.len() < FRAME_HEADER_LEN + 4 {
        return None;
    }
    Some(read_i32(&frame[FRAME_HEADER_LEN..FRAME_HEADER_LEN + 4]))
}

/// Backend process id announced by BackendKeyData
pub fn backend_pid(handshake: &[u8]) -> Option<i32> {
    frames(handshake)
        .find(|f| f[0] == TAG_BACKEND_KEY_DATA && f.len() >= FRAME_HEADER_LEN + 8)
        .map(|f| read_i32(&f[FRAME_HEADER_LEN..FRAME_HEADER_LEN + 4]))
}

/// Human readable message field (`'M'`) of an ErrorResponse
pub fn error_message(frame: &[u8]) -> String {
    let mut fields = frame.get(FRAME_HEADER_LEN..).unwrap_or_default();
    while let Some((&code, rest)) = fields.split_first() {
        if code == 0 {
            break;
        }
        let end = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
        if code == b'M' {
            return String::from_utf8_lossy(&rest[..end]).into_owned();
        }
        fields = rest.get(end + 1..).unwrap_or_default();
    }
    "unknown error".to_string()
}
