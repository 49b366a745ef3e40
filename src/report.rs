//! Periodic stats push to a graphite-style collector
//!
//! Every flush interval, snapshot the registry and write one plaintext
//! `name value timestamp` line per stat over a fresh TCP connection.
//! A failed flush is logged and skipped; the next tick retries. The
//! reporter drives the stat queries, so this task is also what resets the
//! trackers' windowed sets each interval.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::stats::{StatSample, StatsRegistry};

/// Run the flush loop forever.
pub async fn run(
    registry: Arc<StatsRegistry>,
    collector: SocketAddr,
    instance: String,
    interval: Duration,
) {
    let prefix = format!("service_is_carbon-tagger.instance_is_{}", instance);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so the first reported
    // window is a full interval.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let samples = registry.snapshot().await;
        match flush(collector, &prefix, &samples).await {
            Ok(()) => debug!("flushed {} stats to {}", samples.len(), collector),
            Err(e) => warn!("stats flush to {} failed: {}", collector, e),
        }
    }
}

/// Write one snapshot to the collector.
async fn flush(
    collector: SocketAddr,
    prefix: &str,
    samples: &[StatSample],
) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(collector).await?;
    let timestamp = Utc::now().timestamp();

    let mut payload = String::with_capacity(samples.len() * 64);
    for sample in samples {
        payload.push_str(&format!(
            "{}.{} {} {}\n",
            prefix, sample.name, sample.value, timestamp
        ));
    }

    stream.write_all(payload.as_bytes()).await?;
    stream.shutdown().await
}
