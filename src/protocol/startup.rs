//! Startup packet parsing
//!
//! The first frame a client sends has no tag byte: a 4-byte length, a 4-byte
//! request code, then for a regular startup a list of NUL-terminated
//! key/value pairs closed by an empty key.

use super::consts::*;
use super::frame::read_u32;
use crate::error::StartupError;
use crate::helper::MAX_STARTUP_PACKET_LENGTH;

/// Connection parameters carried by a regular startup packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupParams {
    /// Role name
    pub user: String,
    /// Database name, defaults to the role name
    pub database: String,
    /// Every other parameter, in packet order
    pub options: Vec<(String, String)>,
}

/// What a client asked for in its first frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupRequest {
    /// Regular protocol 3 startup
    Startup(StartupParams),
    /// SSLRequest
    Ssl,
    /// GSSENCRequest
    GssEnc,
}

/// Parse a complete startup packet, length prefix included
pub fn parse_startup(packet: &[u8]) -> Result<StartupRequest, StartupError> {
    if packet.len() < MIN_STARTUP_PACKET_LENGTH || packet.len() > MAX_STARTUP_PACKET_LENGTH {
        return Err(StartupError::InvalidLength(packet.len()));
    }
    let declared = read_u32(&packet[0..4]) as usize;
    if declared != packet.len() {
        return Err(StartupError::InvalidLength(declared));
    }

    let code = read_u32(&packet[4..8]);
    match code {
        SSL_REQUEST_CODE => return Ok(StartupRequest::Ssl),
        GSSENC_REQUEST_CODE => return Ok(StartupRequest::GssEnc),
        CANCEL_REQUEST_CODE => return Err(StartupError::CancelRequest),
        _ => {}
    }

    let major = (code >> 16) as u16;
    let minor = (code & 0xffff) as u16;
    if major != (PROTOCOL_V3 >> 16) as u16 {
        return Err(StartupError::UnsupportedProtocol { major, minor });
    }

    let mut rest = &packet[8..];
    let mut user = None;
    let mut database = None;
    let mut options = Vec::new();

    loop {
        let key = take_cstr(&mut rest)
            .ok_or_else(|| StartupError::Malformed("missing terminator".to_string()))?;
        if key.is_empty() {
            break;
        }
        let value = take_cstr(&mut rest)
            .ok_or_else(|| StartupError::Malformed(format!("no value for parameter {}", key)))?;

        match key.as_str() {
            "user" => user = Some(value),
            "database" => database = Some(value),
            "replication" => {
                check_replication(&value)?;
                options.push((key, value));
            }
            _ => options.push((key, value)),
        }
    }

    if !rest.is_empty() {
        return Err(StartupError::Malformed(
            "trailing bytes after terminator".to_string(),
        ));
    }

    let user = match user {
        Some(u) if !u.is_empty() => u,
        _ => return Err(StartupError::MissingUser),
    };
    let database = match database {
        Some(d) if !d.is_empty() => d,
        _ => user.clone(),
    };

    Ok(StartupRequest::Startup(StartupParams {
        user,
        database,
        options,
    }))
}

fn check_replication(value: &str) -> Result<(), StartupError> {
    match value.to_ascii_lowercase().as_str() {
        "false" | "off" | "no" | "0" => Ok(()),
        "true" | "on" | "yes" | "1" | "database" => Err(StartupError::Replication),
        other => Err(StartupError::Malformed(format!(
            "invalid value for replication: {}",
            other
        ))),
    }
}

fn take_cstr(rest: &mut &[u8]) -> Option<String> {
    let end = rest.iter().position(|b| *b == 0)?;
    let s = String::from_utf8_lossy(&rest[..end]).into_owned();
    *rest = &rest[end + 1..];
    Some(s)
}

/// Build a startup packet, length prefix included
pub fn startup_packet(params: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&PROTOCOL_V3.to_be_bytes());
    for (k, v) in params {
        body.extend_from_slice(k.as_bytes());
        body.push(0);
        body.extend_from_slice(v.as_bytes());
        body.push(0);
    }
    body.push(0);

    let mut packet = Vec::with_capacity(body.len() + 4);
    packet.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
    packet.extend_from_slice(&body);
    packet
}

/// Build an 8-byte request packet such as SSLRequest
pub fn request_packet(code: u32) -> [u8; 8] {
    let mut packet = [0u8; 8];
    packet[0..4].copy_from_slice(&8u32.to_be_bytes());
    packet[4..8].copy_from_slice(&code.to_be_bytes());
    packet
}
