//! Line classification and dispatch
//!
//! Exactly one classifier task drains the intake channel, so every line is
//! classified (and counted) exactly once. Lines containing `=` or `_is_`
//! are proto-2 and go through the tag-spec parser; everything else is
//! proto-1 and only checked for gross shape.
//!
//! The send into the bounded proto-2 queue is this task's one suspension
//! point besides the intake recv: when the tracker or the index behind it
//! falls behind, the classifier stalls here and backpressure walks up the
//! intake channel to the connection handlers.

use memchr::memmem;
use tokio::sync::mpsc;
use tracing::debug;

use crate::spec::{parse_tag_spec, MetricSpec};
use crate::stats::IngestStats;

/// Classify and route raw lines until the intake channel closes.
pub async fn run(
    mut intake: mpsc::Receiver<Vec<u8>>,
    proto1: mpsc::UnboundedSender<String>,
    proto2: mpsc::Sender<MetricSpec>,
    stats: IngestStats,
) {
    let tag_marker = memmem::Finder::new(b"_is_");
    while let Some(raw) = intake.recv().await {
        let tagged = memchr::memchr(b'=', &raw).is_some() || tag_marker.find(&raw).is_some();
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim();

        if tagged {
            match parse_tag_spec(line) {
                Ok(spec) => {
                    stats.proto2_good.inc();
                    // Blocks when the downstream queue is full; that is the
                    // backpressure contract, not an error.
                    if proto2.send(spec).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    stats.proto2_bad.inc();
                    debug!("dropping invalid proto-2 line '{}': {}", line, e);
                }
            }
        } else if line.split(' ').count() == 3 {
            stats.proto1_good.inc();
            if proto1.send(line.to_string()).is_err() {
                return;
            }
        } else {
            stats.proto1_bad.inc();
        }
    }
}
