//! carbon-tagger: a metrics ingestion daemon that extracts tag metadata
//! from graphite-style metric lines and indexes it in Elasticsearch.
//!
//! Metrics arrive over TCP, one observation per line. Lines come in two
//! protocols:
//! - proto-1: plain `name value timestamp` lines, counted but not indexed
//! - proto-2: `tagged.metric.id value timestamp` lines whose dotted id
//!   encodes key/value tags (`key_is_value` or `key=value` segments)
//!
//! Each distinct proto-2 metric identity is forwarded to the index at most
//! once per process lifetime. All mutable state (dedup sets, windowed
//! counters) is owned by exactly one worker task and read through
//! message-passing queries, so the pipeline needs no locks.

pub mod classifier;
pub mod config;
pub mod index;
pub mod ingest;
pub mod pipeline;
pub mod report;
pub mod spec;
pub mod stats;
pub mod tracker;

pub use config::{create_default_config, load_config, Config};
pub use index::{ElasticIndex, TagDocument, TagIndex};
pub use pipeline::Pipeline;
pub use spec::{parse_tag_spec, MetricSpec, ParseError};
pub use stats::StatsRegistry;
