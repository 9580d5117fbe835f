//! Session pool configuration
//!
//! Defines limits for the per-(database, role) backend pools.

use serde::{Deserialize, Serialize};

/// Default maximum backends per pool
fn default_max_backends() -> usize {
    10
}

/// Default initial channel buffer size in bytes
fn default_buffer_size() -> usize {
    64 * 1024
}

/// Default cap on a single protocol message
fn default_max_frame_size() -> usize {
    crate::helper::MAX_FRAME_SIZE
}

/// Session pool configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolConfig {
    /// Maximum number of backends launched for one (database, role) pool
    #[serde(default = "default_max_backends")]
    pub max_backends: usize,

    /// Initial size of every channel buffer
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Largest message a channel may buffer; bigger ones drop the connection
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_backends: default_max_backends(),
            buffer_size: default_buffer_size(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl PoolConfig {
    /// Validate the pool configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_backends == 0 {
            return Err("max_backends must be greater than 0".to_string());
        }
        // Large enough for a complete startup packet header and a terminate frame
        if self.buffer_size < 64 {
            return Err("buffer_size must be at least 64 bytes".to_string());
        }
        if self.max_frame_size < self.buffer_size {
            return Err("max_frame_size must not be smaller than buffer_size".to_string());
        }
        Ok(())
    }
}
