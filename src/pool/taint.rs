//! Externally reported session state
//!
//! Backends whose pid is registered here keep session state and must not be
//! shared with other clients.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Shared set of engine pids known to carry session state
#[derive(Debug, Clone, Default)]
pub struct TaintRegistry {
    pids: Arc<Mutex<HashSet<i32>>>,
}

impl TaintRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark backend `pid` as tainted
    pub fn mark(&self, pid: i32) {
        if let Ok(mut pids) = self.pids.lock() {
            pids.insert(pid);
        }
    }

    /// Whether backend `pid` is tainted
    pub fn contains(&self, pid: i32) -> bool {
        self.pids
            .lock()
            .map(|pids| pids.contains(&pid))
            .unwrap_or(false)
    }

    /// Forget `pid` once its backend is gone
    pub fn forget(&self, pid: i32) {
        if let Ok(mut pids) = self.pids.lock() {
            pids.remove(&pid);
        }
    }
}
