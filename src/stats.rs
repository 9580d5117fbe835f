//! Per-worker statistics
//!
//! Each worker owns one [`ProxyState`]; the acceptor reads it to balance
//! clients and the admin listener renders it as a table.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Live counters of one proxy worker
#[derive(Debug, Default)]
pub struct ProxyState {
    /// Worker index
    pub worker_id: usize,
    /// Process id of the worker
    pub pid: u32,
    /// Connected clients
    pub n_clients: AtomicUsize,
    /// Connected clients using an encrypted stream
    pub n_ssl_clients: AtomicUsize,
    /// Session pools created
    pub n_pools: AtomicUsize,
    /// Open backend sessions
    pub n_backends: AtomicUsize,
    /// Backends dedicated to one client because of session state
    pub n_dedicated_backends: AtomicUsize,
    /// Bytes written to clients
    pub tx_bytes: AtomicU64,
    /// Bytes written to backends
    pub rx_bytes: AtomicU64,
    /// Completed transactions
    pub n_transactions: AtomicU64,
}

impl ProxyState {
    /// Create zeroed state for worker `worker_id`
    pub fn new(worker_id: usize) -> Self {
        ProxyState {
            worker_id,
            pid: std::process::id(),
            ..Default::default()
        }
    }

    /// Record a client connection
    pub fn record_client_added(&self) {
        self.n_clients.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a client disconnection
    pub fn record_client_removed(&self) {
        self.n_clients.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an encrypted client
    pub fn record_ssl_client_added(&self) {
        self.n_ssl_clients.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an encrypted client leaving
    pub fn record_ssl_client_removed(&self) {
        self.n_ssl_clients.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a new session pool
    pub fn record_pool_created(&self) {
        self.n_pools.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a backend launch
    pub fn record_backend_added(&self) {
        self.n_backends.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a backend teardown
    pub fn record_backend_removed(&self) {
        self.n_backends.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a backend becoming dedicated
    pub fn record_dedicated_added(&self) {
        self.n_dedicated_backends.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dedicated backend teardown
    pub fn record_dedicated_removed(&self) {
        self.n_dedicated_backends.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record bytes written to a client
    pub fn record_tx(&self, n: usize) {
        self.tx_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Record bytes written to a backend
    pub fn record_rx(&self, n: usize) {
        self.rx_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Record a completed transaction
    pub fn record_transaction(&self) {
        self.n_transactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Current number of clients
    pub fn clients(&self) -> usize {
        self.n_clients.load(Ordering::Relaxed)
    }

    /// Get current stats snapshot
    pub fn snapshot(&self) -> ProxyStateSnapshot {
        ProxyStateSnapshot {
            worker_id: self.worker_id,
            pid: self.pid,
            n_clients: self.n_clients.load(Ordering::Relaxed),
            n_ssl_clients: self.n_ssl_clients.load(Ordering::Relaxed),
            n_pools: self.n_pools.load(Ordering::Relaxed),
            n_backends: self.n_backends.load(Ordering::Relaxed),
            n_dedicated_backends: self.n_dedicated_backends.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            n_transactions: self.n_transactions.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of worker statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyStateSnapshot {
    /// Worker index
    pub worker_id: usize,
    /// Process id of the proxy
    pub pid: u32,
    /// Connected clients
    pub n_clients: usize,
    /// Clients that arrived over an encrypted transport
    pub n_ssl_clients: usize,
    /// Session pools created so far
    pub n_pools: usize,
    /// Open backend sessions
    pub n_backends: usize,
    /// Backends dedicated to one client because of session state
    pub n_dedicated_backends: usize,
    /// Bytes written to clients
    pub tx_bytes: u64,
    /// Bytes written to backends
    pub rx_bytes: u64,
    /// Transactions completed by backends
    pub n_transactions: u64,
}

const COLUMNS: [&str; 10] = [
    "worker",
    "pid",
    "clients",
    "ssl_clients",
    "pools",
    "backends",
    "dedicated",
    "tx_bytes",
    "rx_bytes",
    "transactions",
];

/// Render one row per worker as a plain text table
pub fn render_table(rows: &[ProxyStateSnapshot]) -> String {
    let cells: Vec<[String; 10]> = rows
        .iter()
        .map(|s| {
            [
                s.worker_id.to_string(),
                s.pid.to_string(),
                s.n_clients.to_string(),
                s.n_ssl_clients.to_string(),
                s.n_pools.to_string(),
                s.n_backends.to_string(),
                s.n_dedicated_backends.to_string(),
                s.tx_bytes.to_string(),
                s.rx_bytes.to_string(),
                s.n_transactions.to_string(),
            ]
        })
        .collect();

    let mut widths = COLUMNS.map(str::len);
    for row in &cells {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.len());
        }
    }

    let mut out = String::new();
    let header: Vec<String> = COLUMNS
        .iter()
        .zip(widths.iter())
        .map(|(name, w)| format!("{:>w$}", name, w = w))
        .collect();
    let _ = writeln!(out, "{}", header.join(" | "));
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", rule.join("-+-"));
    for row in &cells {
        let line: Vec<String> = row
            .iter()
            .zip(widths.iter())
            .map(|(cell, w)| format!("{:>w$}", cell, w = w))
            .collect();
        let _ = writeln!(out, "{}", line.join(" | "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let state = ProxyState::new(3);
        state.record_client_added();
        state.record_client_added();
        state.record_client_removed();
        state.record_backend_added();
        state.record_tx(10);
        state.record_rx(4);
        state.record_transaction();

        let snap = state.snapshot();
        assert_eq!(snap.worker_id, 3);
        assert_eq!(snap.n_clients, 1);
        assert_eq!(snap.n_backends, 1);
        assert_eq!(snap.tx_bytes, 10);
        assert_eq!(snap.rx_bytes, 4);
        assert_eq!(snap.n_transactions, 1);
        assert_eq!(state.clients(), 1);
    }

    #[test]
    fn test_render_table() {
        let rows = vec![
            ProxyStateSnapshot {
                worker_id: 0,
                pid: 100,
                n_clients: 12,
                ..Default::default()
            },
            ProxyStateSnapshot {
                worker_id: 1,
                pid: 100,
                tx_bytes: 123456789,
                ..Default::default()
            },
        ];
        let table = render_table(&rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("transactions"));
        assert!(lines[2].contains("12"));
        assert!(lines[3].contains("123456789"));
        assert!(lines.iter().all(|l| l.len() == lines[0].len()));
    }
}
