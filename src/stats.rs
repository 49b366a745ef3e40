//! Live ingestion stats
//!
//! Two flavors of stat live here:
//!
//! - [`Counter`] and [`Gauge`] are plain atomics, safe to bump from any
//!   task. They back the hot-path counters (lines seen, open connections)
//!   that have no owning worker.
//! - Queried stats have no stored value at all. The owning worker holds a
//!   [`QueryReceiver`] and answers each [`ValueQuery`] from inside its own
//!   scheduling loop, so a windowed set is only ever read (and reset)
//!   between the owner's other state transitions. The registry keeps the
//!   matching [`QueryHandle`] and performs the rendezvous at snapshot time.
//!
//! Queries carry no timeout: a busy owner answers on its own schedule, and
//! nothing else in the pipeline blocks on the answer.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Monotonic event counter.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Current-magnitude gauge (e.g. open connections).
#[derive(Debug, Clone, Default)]
pub struct Gauge(Arc<AtomicI64>);

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// One pending read of a worker-owned stat. The owner computes the current
/// value and replies; dropping the query without answering is treated as a
/// missed sample by the requester.
#[derive(Debug)]
pub struct ValueQuery {
    reply: oneshot::Sender<i64>,
}

impl ValueQuery {
    pub fn answer(self, value: i64) {
        // The requester may have given up; its absence is not our problem.
        let _ = self.reply.send(value);
    }
}

/// Owner-side end of a queried stat. Held by exactly one worker, which
/// answers queries inside its normal `select!` loop.
#[derive(Debug)]
pub struct QueryReceiver {
    rx: mpsc::Receiver<ValueQuery>,
}

impl QueryReceiver {
    pub async fn recv(&mut self) -> Option<ValueQuery> {
        self.rx.recv().await
    }
}

/// Requester-side end of a queried stat, kept inside the registry.
#[derive(Debug, Clone)]
struct QueryHandle {
    tx: mpsc::Sender<ValueQuery>,
}

impl QueryHandle {
    /// Request the current value and wait for the owner to answer.
    /// Returns `None` when the owning worker is gone.
    async fn fetch(&self) -> Option<i64> {
        let (reply, response) = oneshot::channel();
        self.tx.send(ValueQuery { reply }).await.ok()?;
        response.await.ok()
    }
}

/// One named value in a stats snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatSample {
    pub name: String,
    pub value: i64,
}

#[derive(Debug)]
enum StatSource {
    Counter(Counter),
    Gauge(Gauge),
    Queried(QueryHandle),
}

/// Registry of every stat the daemon exposes, in registration order.
///
/// Construction happens once at startup; after that the registry is only
/// read (snapshots), so it is shared immutably.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    entries: Vec<(String, StatSource)>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&mut self, name: &str) -> Counter {
        let counter = Counter::new();
        self.entries
            .push((name.to_string(), StatSource::Counter(counter.clone())));
        counter
    }

    pub fn gauge(&mut self, name: &str) -> Gauge {
        let gauge = Gauge::new();
        self.entries
            .push((name.to_string(), StatSource::Gauge(gauge.clone())));
        gauge
    }

    /// Register a worker-owned stat and hand back the owner side. Queries
    /// for `name` rendezvous with whichever worker holds the receiver.
    pub fn queried(&mut self, name: &str) -> QueryReceiver {
        let (tx, rx) = mpsc::channel(1);
        self.entries
            .push((name.to_string(), StatSource::Queried(QueryHandle { tx })));
        QueryReceiver { rx }
    }

    /// Collect the current value of every registered stat.
    ///
    /// Queried stats whose owner has exited are skipped with a warning so
    /// one dead worker cannot wedge the reporter.
    pub async fn snapshot(&self) -> Vec<StatSample> {
        let mut samples = Vec::with_capacity(self.entries.len());
        for (name, source) in &self.entries {
            let value = match source {
                StatSource::Counter(c) => Some(c.value() as i64),
                StatSource::Gauge(g) => Some(g.value()),
                StatSource::Queried(handle) => handle.fetch().await,
            };
            match value {
                Some(value) => samples.push(StatSample {
                    name: name.clone(),
                    value,
                }),
                None => warn!("stat '{}' has no live owner, skipping", name),
            }
        }
        samples
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Canonical stat names.
///
/// The names are themselves valid proto-2 metric specs, so the daemon's own
/// stats survive a trip through another carbon-tagger.
pub mod names {
    pub const CONNS_OPEN: &str = "unit_is_Conn.direction_is_in.type_is_open";
    pub const CONNS_BROKEN: &str = "unit_is_Conn.direction_is_in.type_is_broken";
    pub const PROTO1_GOOD: &str = "unit_is_Metric.proto_is_1.direction_is_in.type_is_good";
    pub const PROTO2_GOOD: &str = "unit_is_Metric.proto_is_2.direction_is_in.type_is_good";
    pub const PROTO1_BAD: &str = "unit_is_Err.type_is_invalid_line.proto_is_1.direction_is_in";
    pub const PROTO2_BAD: &str = "unit_is_Err.type_is_invalid_line.proto_is_2.direction_is_in";
    pub const PROTO2_BACKLOG: &str = "unit_is_Metric.proto_is_2.type_is_to_track";
    pub const PROTO1_TRACKED: &str = "unit_is_Metric.proto_is_1.type_is_tracked";
    pub const PROTO2_TRACKED: &str = "unit_is_Metric.proto_is_2.type_is_tracked";
}

/// The hot-path counters shared by connection handlers and the classifier.
///
/// Cloning is cheap; every clone observes the same values.
#[derive(Debug, Clone)]
pub struct IngestStats {
    /// Producers currently connected.
    pub conns_open: Gauge,
    /// Connections that ended with a transport error.
    pub conns_broken: Counter,
    pub proto1_good: Counter,
    pub proto1_bad: Counter,
    pub proto2_good: Counter,
    pub proto2_bad: Counter,
}

impl IngestStats {
    pub fn register(registry: &mut StatsRegistry) -> Self {
        Self {
            conns_open: registry.gauge(names::CONNS_OPEN),
            conns_broken: registry.counter(names::CONNS_BROKEN),
            proto1_good: registry.counter(names::PROTO1_GOOD),
            proto1_bad: registry.counter(names::PROTO1_BAD),
            proto2_good: registry.counter(names::PROTO2_GOOD),
            proto2_bad: registry.counter(names::PROTO2_BAD),
        }
    }
}
