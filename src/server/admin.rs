//! Diagnostics listener
//!
//! Every connection sends one command line and receives one reply before the
//! connection is closed:
//!
//! ```text
//! show            worker table (also for an empty line or EOF)
//! taint <pid>     backend <pid> keeps session state; never share it again
//! ```

use crate::pool::TaintRegistry;
use crate::stats::{render_table, ProxyState};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Longest command line accepted
const MAX_COMMAND_LEN: u64 = 256;

/// How long a connection may take to send its command
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Request understood by the admin listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Render the worker table
    Show,
    /// Mark the backend with this engine pid as carrying session state
    Taint(i32),
}

impl FromStr for AdminCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (None, _, _) | (Some("show"), None, _) => Ok(AdminCommand::Show),
            (Some("taint"), Some(pid), None) => pid
                .parse()
                .map(AdminCommand::Taint)
                .map_err(|_| format!("invalid pid '{}'", pid)),
            (Some("taint"), _, _) => Err("usage: taint <pid>".to_string()),
            _ => Err(format!("unknown command '{}'", line.trim())),
        }
    }
}

/// Serve admin commands on `listener` until the task is dropped
pub async fn serve_admin(
    listener: TcpListener,
    states: Vec<Arc<ProxyState>>,
    taint: TaintRegistry,
) {
    let states = Arc::new(states);
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Admin connection from {}", peer);
                let states = states.clone();
                let taint = taint.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_admin(stream, &states, &taint).await {
                        debug!("Admin connection from {} failed: {}", peer, e);
                    }
                });
            }
            Err(e) => warn!("Failed to accept admin connection: {}", e),
        }
    }
}

async fn handle_admin(
    stream: TcpStream,
    states: &[Arc<ProxyState>],
    taint: &TaintRegistry,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half.take(MAX_COMMAND_LEN));
    let mut line = String::new();
    tokio::time::timeout(COMMAND_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "no command received"))??;

    let reply = match line.parse::<AdminCommand>() {
        Ok(command) => execute(command, states, taint),
        Err(e) => format!("ERROR {}\n", e),
    };
    write_half.write_all(reply.as_bytes()).await?;
    write_half.shutdown().await
}

fn execute(command: AdminCommand, states: &[Arc<ProxyState>], taint: &TaintRegistry) -> String {
    match command {
        AdminCommand::Show => {
            let snapshots: Vec<_> = states.iter().map(|s| s.snapshot()).collect();
            render_table(&snapshots)
        }
        AdminCommand::Taint(pid) => {
            taint.mark(pid);
            info!("Backend pid {} reported to keep session state", pid);
            "OK\n".to_string()
        }
    }
}
