//! Ingress listener and per-connection line reading
//!
//! One task per accepted producer connection. Each handler reads
//! newline-terminated lines and forwards the raw bytes, unvalidated, onto
//! the shared intake channel; classification happens downstream. The intake
//! channel is bounded, so a stalled classifier eventually blocks the
//! handler's send and, through the socket's read buffer, the producer
//! itself.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::stats::{Gauge, IngestStats};

/// Initial line buffer size. Metric lines are short; this avoids regrowth
/// for virtually all of them.
const LINE_BUF_CAPACITY: usize = 512;

/// Keeps the open-connections gauge honest on every exit path.
struct ConnectionGuard {
    gauge: Gauge,
}

impl ConnectionGuard {
    fn new(gauge: Gauge) -> Self {
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Accept producer connections forever, spawning one handler task each.
///
/// A failed accept is logged and the loop continues; only losing the
/// listener socket itself would end ingestion.
pub async fn accept_loop(
    listener: TcpListener,
    intake: mpsc::Sender<Vec<u8>>,
    stats: IngestStats,
) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let intake = intake.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    handle_producer(stream, addr, intake, stats).await;
                });
            }
            Err(e) => error!("failed to accept connection: {}", e),
        }
    }
}

/// Read newline-delimited metric lines from one producer until EOF or a
/// transport error.
///
/// Unterminated trailing bytes at connection end are discarded with a
/// warning; there is no partial-line recovery.
pub async fn handle_producer<S>(
    stream: S,
    addr: SocketAddr,
    intake: mpsc::Sender<Vec<u8>>,
    stats: IngestStats,
) where
    S: AsyncRead + Unpin,
{
    let _guard = ConnectionGuard::new(stats.conns_open.clone());
    debug!("metric producer connected from {}", addr);

    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(LINE_BUF_CAPACITY);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            // Clean close on a line boundary.
            Ok(0) => {
                debug!("producer {} disconnected", addr);
                return;
            }
            Ok(_) if buf.last() == Some(&b'\n') => {
                buf.pop();
                let line = std::mem::replace(&mut buf, Vec::with_capacity(LINE_BUF_CAPACITY));
                // A closed intake means the pipeline is going away.
                if intake.send(line).await.is_err() {
                    return;
                }
            }
            // EOF in the middle of a line.
            Ok(n) => {
                warn!(
                    "producer {} closed mid-line, discarding {} unterminated bytes",
                    addr, n
                );
                return;
            }
            Err(e) => {
                stats.conns_broken.inc();
                warn!("connection from {} closed uncleanly: {}", addr, e);
                if !buf.is_empty() {
                    warn!(
                        "discarding {} unterminated bytes from broken connection {}",
                        buf.len(),
                        addr
                    );
                }
                return;
            }
        }
    }
}
