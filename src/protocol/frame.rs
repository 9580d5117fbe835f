//! Frame boundary detection and marker classification
//!
//! The proxy never decodes payloads. It only needs to know where a frame ends
//! and whether a complete frame is one of the few markers that drive
//! scheduling decisions.
//!
//! ```text
//! startup:  | length (4, BE, includes itself) | body ...            |
//! regular:  | tag (1) | length (4, BE, excludes tag) | payload ...   |
//! ```

use super::consts::*;
use crate::error::ProxyError;
use crate::helper::MAX_STARTUP_PACKET_LENGTH;

/// Which side of the proxy produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Frame received from a client
    Client,
    /// Frame received from a backend
    Backend,
}

/// Scheduling-relevant meaning of a complete frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Backend finished processing and is outside a transaction block
    ReadyIdle,
    /// Client asks to close its session
    Terminate,
    /// Frame establishes state that outlives the transaction
    SessionState,
    /// Anything else; forwarded without interpretation
    Opaque,
}

/// Total length of the startup packet whose header starts `buf`
///
/// `buf` must hold at least 4 bytes.
pub fn startup_len(buf: &[u8]) -> Result<usize, ProxyError> {
    let len = read_u32(&buf[0..4]) as usize;
    if !(MIN_STARTUP_PACKET_LENGTH..=MAX_STARTUP_PACKET_LENGTH).contains(&len) {
        return Err(ProxyError::Protocol(format!(
            "invalid startup packet length {}",
            len
        )));
    }
    Ok(len)
}

/// Total length (tag included) of the regular frame whose header starts `buf`
///
/// `buf` must hold at least [`FRAME_HEADER_LEN`] bytes.
pub fn frame_len(buf: &[u8]) -> Result<usize, ProxyError> {
    let len = read_u32(&buf[1..FRAME_HEADER_LEN]) as usize;
    if len < 4 {
        return Err(ProxyError::Protocol(format!(
            "invalid length {} for message '{}'",
            len,
            char::from(buf[0])
        )));
    }
    Ok(len + 1)
}

/// Classify a complete frame
pub fn classify(origin: Origin, frame: &[u8]) -> Marker {
    let payload = &frame[FRAME_HEADER_LEN..];
    match (origin, frame[0]) {
        (Origin::Backend, TAG_READY_FOR_QUERY) if payload.first() == Some(&TX_STATUS_IDLE) => {
            Marker::ReadyIdle
        }
        (Origin::Backend, TAG_PARAMETER_STATUS) => Marker::SessionState,
        (Origin::Client, TAG_TERMINATE) => Marker::Terminate,
        // Named prepared statements survive the transaction
        (Origin::Client, TAG_PARSE) if payload.first().is_some_and(|b| *b != 0) => {
            Marker::SessionState
        }
        _ => Marker::Opaque,
    }
}

/// Iterate over the complete frames of a buffer that starts on a frame boundary
///
/// Stops at the first incomplete or malformed frame.
pub fn frames(buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = buf;
    std::iter::from_fn(move || {
        if rest.len() < FRAME_HEADER_LEN {
            return None;
        }
        let len = frame_len(rest).ok()?;
        if rest.len() < len {
            return None;
        }
        let (frame, tail) = rest.split_at(len);
        rest = tail;
        Some(frame)
    })
}

/// Append a regular frame to `out`
pub fn write_frame(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.push(tag);
    out.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
    out.extend_from_slice(payload);
}

pub(crate) fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub(crate) fn read_i32(bytes: &[u8]) -> i32 {
    i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_frame(&mut out, tag, payload);
        out
    }

    #[test]
    fn test_frame_len_includes_tag() {
        let f = frame(b'Q', b"select 1\0");
        assert_eq!(frame_len(&f).unwrap(), f.len());
    }

    #[test]
    fn test_frame_len_rejects_short_length() {
        let bad = [b'Q', 0, 0, 0, 3];
        assert!(matches!(frame_len(&bad), Err(ProxyError::Protocol(_))));
    }

    #[test]
    fn test_startup_len_bounds() {
        assert_eq!(startup_len(&[0, 0, 0, 8]).unwrap(), 8);
        assert!(startup_len(&[0, 0, 0, 7]).is_err());
        assert!(startup_len(&[0, 1, 0, 0]).is_err());
    }

    #[test]
    fn test_classify_ready_for_query() {
        assert_eq!(
            classify(Origin::Backend, &frame(b'Z', b"I")),
            Marker::ReadyIdle
        );
        assert_eq!(classify(Origin::Backend, &frame(b'Z', b"T")), Marker::Opaque);
        assert_eq!(classify(Origin::Backend, &frame(b'Z', b"E")), Marker::Opaque);
        // A client never sends ReadyForQuery; the tag means nothing there
        assert_eq!(classify(Origin::Client, &frame(b'Z', b"I")), Marker::Opaque);
    }

    #[test]
    fn test_classify_terminate() {
        assert_eq!(
            classify(Origin::Client, &TERMINATE_FRAME),
            Marker::Terminate
        );
        assert_eq!(classify(Origin::Backend, &TERMINATE_FRAME), Marker::Opaque);
    }

    #[test]
    fn test_classify_session_state() {
        assert_eq!(
            classify(Origin::Backend, &frame(b'S', b"TimeZone\0UTC\0")),
            Marker::SessionState
        );
        assert_eq!(
            classify(Origin::Client, &frame(b'P', b"stmt1\0select 1\0\0\0")),
            Marker::SessionState
        );
        assert_eq!(
            classify(Origin::Client, &frame(b'P', b"\0select 1\0\0\0")),
            Marker::Opaque
        );
    }

    #[test]
    fn test_frames_stops_at_partial_frame() {
        let mut buf = frame(b'C', b"SELECT 1\0");
        buf.extend_from_slice(&frame(b'Z', b"I"));
        let partial = frame(b'D', b"row data");
        buf.extend_from_slice(&partial[..4]);

        let tags: Vec<u8> = frames(&buf).map(|f| f[0]).collect();
        assert_eq!(tags, vec![b'C', b'Z']);
    }
}
