//! Wire protocol constants
//!
//! Message tags and request codes of the PostgreSQL v3 protocol that the
//! proxy needs to recognize.

/// Protocol version 3.0 as sent in the startup packet
pub const PROTOCOL_V3: u32 = 196608;

/// SSLRequest code
pub const SSL_REQUEST_CODE: u32 = 80877103;

/// GSSENCRequest code
pub const GSSENC_REQUEST_CODE: u32 = 80877104;

/// CancelRequest code
pub const CANCEL_REQUEST_CODE: u32 = 80877102;

/// Tag byte plus 4-byte length
pub const FRAME_HEADER_LEN: usize = 5;

/// Smallest valid startup packet (length + code)
pub const MIN_STARTUP_PACKET_LENGTH: usize = 8;

/// Terminate frame synthesized when the proxy closes a backend session
pub const TERMINATE_FRAME: [u8; 5] = [TAG_TERMINATE, 0, 0, 0, 4];

/// Reply refusing SSL or GSS encryption
pub const ENCRYPTION_REFUSED: u8 = b'N';

// Frontend tags
/// Terminate
pub const TAG_TERMINATE: u8 = b'X';
/// Parse (extended query)
pub const TAG_PARSE: u8 = b'P';
/// Password message
pub const TAG_PASSWORD: u8 = b'p';

// Backend tags
/// ReadyForQuery
pub const TAG_READY_FOR_QUERY: u8 = b'Z';
/// ParameterStatus
pub const TAG_PARAMETER_STATUS: u8 = b'S';
/// BackendKeyData
pub const TAG_BACKEND_KEY_DATA: u8 = b'K';
/// Authentication request
pub const TAG_AUTHENTICATION: u8 = b'R';
/// ErrorResponse
pub const TAG_ERROR_RESPONSE: u8 = b'E';
/// NoticeResponse
pub const TAG_NOTICE_RESPONSE: u8 = b'N';

// Transaction status carried by ReadyForQuery
/// Idle, not in a transaction block
pub const TX_STATUS_IDLE: u8 = b'I';

// Authentication request codes
/// Authentication succeeded
pub const AUTH_OK: i32 = 0;
/// Cleartext password requested
pub const AUTH_CLEARTEXT_PASSWORD: i32 = 3;
/// MD5 password requested
pub const AUTH_MD5_PASSWORD: i32 = 5;
/// SASL exchange requested, payload lists mechanisms
pub const AUTH_SASL: i32 = 10;
/// SASL challenge
pub const AUTH_SASL_CONTINUE: i32 = 11;
/// SASL outcome, payload carries the server signature
pub const AUTH_SASL_FINAL: i32 = 12;

/// The only SASL mechanism the proxy speaks
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";
