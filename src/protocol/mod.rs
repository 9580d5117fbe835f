//! Protocol module for Poolrat
//!
//! The proxy only understands enough of the PostgreSQL v3 wire protocol to
//! find frame boundaries, parse the startup packet and log into the engine.

pub mod consts;
mod frame;
mod handshake;
mod scram;
mod startup;

pub use frame::{classify, frame_len, frames, startup_len, write_frame, Marker, Origin};
pub use handshake::{
    auth_code, auth_data, backend_pid, error_message, md5_password, password_message,
    sasl_initial_response, sasl_mechanisms, sasl_response, startup_message,
};
pub use scram::ScramClient;
pub use startup::{parse_startup, request_packet, startup_packet, StartupParams, StartupRequest};
