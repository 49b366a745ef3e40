//! Pipeline wiring
//!
//! Builds the channels, registers the stats, spawns the long-lived workers
//! and runs the accept loop. Channel capacities implement the flow-control
//! design: a bounded intake channel in front of the classifier, an
//! unbounded proto-1 channel (its tracker only inserts into a set), and a
//! proto-2 queue bounded to `max_pending`, the single backpressure point
//! toward the index.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{lookup_host, TcpListener};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::classifier;
use crate::config::Config;
use crate::index::{ElasticIndex, TagIndex};
use crate::ingest;
use crate::report;
use crate::stats::{names, IngestStats, StatsRegistry};
use crate::tracker;

/// A running ingestion pipeline: classifier and tracker workers plus the
/// intake channel that feeds them.
pub struct Pipeline {
    intake: mpsc::Sender<Vec<u8>>,
    stats: IngestStats,
    classifier: JoinHandle<()>,
    proto1: JoinHandle<()>,
    proto2: JoinHandle<Result<()>>,
}

impl Pipeline {
    /// Spawn the classifier and both trackers, registering their stats.
    pub fn spawn(config: &Config, index: Arc<dyn TagIndex>, registry: &mut StatsRegistry) -> Self {
        let stats = IngestStats::register(registry);
        let proto1_tracked = registry.queried(names::PROTO1_TRACKED);
        let proto2_backlog = registry.queried(names::PROTO2_BACKLOG);
        let proto2_tracked = registry.queried(names::PROTO2_TRACKED);

        let (intake_tx, intake_rx) = mpsc::channel(config.ingest.intake_depth);
        let (proto1_tx, proto1_rx) = mpsc::unbounded_channel();
        // Full queue blocks the classifier rather than dropping metrics.
        let (proto2_tx, proto2_rx) = mpsc::channel(config.elasticsearch.max_pending);

        let classifier = tokio::spawn(classifier::run(
            intake_rx,
            proto1_tx,
            proto2_tx,
            stats.clone(),
        ));
        let proto1 = tokio::spawn(tracker::track_proto1(proto1_rx, proto1_tracked));
        let proto2 = tokio::spawn(tracker::track_proto2(
            proto2_rx,
            index,
            config.elasticsearch.index.clone(),
            proto2_backlog,
            proto2_tracked,
        ));

        Self {
            intake: intake_tx,
            stats,
            classifier,
            proto1,
            proto2,
        }
    }

    /// Sender feeding the classifier; one clone per connection handler.
    pub fn intake(&self) -> mpsc::Sender<Vec<u8>> {
        self.intake.clone()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats.clone()
    }

    /// Accept producer connections until a fatal pipeline error.
    ///
    /// The accept loop itself never finishes; this returns when the proto-2
    /// tracker dies, which only happens on an index submission failure.
    pub async fn serve(mut self, listener: TcpListener) -> Result<()> {
        let result = tokio::select! {
            result = ingest::accept_loop(listener, self.intake.clone(), self.stats.clone()) => result,
            tracker = &mut self.proto2 => match tracker {
                Ok(Ok(())) => Err(anyhow::anyhow!("proto-2 tracker exited unexpectedly")),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(anyhow::anyhow!("proto-2 tracker panicked: {}", e)),
            },
        };

        self.classifier.abort();
        self.proto1.abort();
        self.proto2.abort();
        result
    }
}

/// Run the whole daemon: pipeline, stats reporter and ingress listener.
///
/// Errors returned here are fatal and terminate the process.
pub async fn run(config: Config) -> Result<()> {
    let mut registry = StatsRegistry::new();

    let index = Arc::new(
        ElasticIndex::new(config.es_url()).context("failed to build the tag index client")?,
    );
    let pipeline = Pipeline::spawn(&config, index, &mut registry);
    let registry = Arc::new(registry);

    // Resolving the collector address is a startup responsibility; a bad
    // stats destination should fail loudly, not every flush.
    let collector = lookup_host(config.stats_addr())
        .await
        .with_context(|| format!("cannot resolve stats address '{}'", config.stats_addr()))?
        .next()
        .with_context(|| format!("stats address '{}' has no usable endpoint", config.stats_addr()))?;
    tokio::spawn(report::run(
        registry.clone(),
        collector,
        config.stats.id.clone(),
        Duration::from_secs(config.stats.flush_interval),
    ));

    let listen_addr = format!("0.0.0.0:{}", config.ingest.port);
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind ingress listener on {}", listen_addr))?;
    info!(
        "carbon-tagger {} listening on {}",
        config.stats.id, listen_addr
    );

    pipeline.serve(listener).await
}
