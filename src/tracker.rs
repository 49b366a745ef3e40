//! Dedup tracker workers
//!
//! Each tracker is the sole owner of its dedup sets. Stat queries are
//! answered inside the same `select!` loop that mutates the sets, so a
//! reader can never observe a half-updated set and no locking is needed.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::index::{TagDocument, TagIndex, DOCUMENT_TYPE};
use crate::spec::MetricSpec;
use crate::stats::QueryReceiver;

/// Track distinct proto-1 lines seen since the last stats query.
///
/// Proto-1 metrics carry no tags and are never indexed; the set exists
/// purely for the "distinct lines per interval" gauge. Answering the query
/// resets the window.
pub async fn track_proto1(
    mut lines: mpsc::UnboundedReceiver<String>,
    mut tracked_queries: QueryReceiver,
) {
    let mut seen: HashSet<String> = HashSet::new();
    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) => {
                    seen.insert(line);
                }
                None => return,
            },
            Some(query) = tracked_queries.recv() => {
                query.answer(seen.len() as i64);
                seen.clear();
            }
        }
    }
}

/// Track proto-2 metric identities and forward each one's tag document to
/// the index at most once.
///
/// This worker is the single serialization point for the forward decision:
/// it alone reads and writes the permanent set, so check-then-insert cannot
/// race. An index submission error is returned as fatal; the collaborator
/// buffers and retries internally, so a synchronous failure means broken
/// configuration or infrastructure.
pub async fn track_proto2(
    mut specs: mpsc::Receiver<MetricSpec>,
    index: Arc<dyn TagIndex>,
    index_name: String,
    mut backlog_queries: QueryReceiver,
    mut tracked_queries: QueryReceiver,
) -> anyhow::Result<()> {
    // Forwarded once, never again for the process lifetime.
    let mut forwarded: HashSet<String> = HashSet::new();
    // Seen since the last stats query; reset on read.
    let mut recent: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            spec = specs.recv() => match spec {
                Some(spec) => {
                    recent.insert(spec.metric_id.clone());
                    if forwarded.contains(&spec.metric_id) {
                        continue;
                    }
                    let MetricSpec { metric_id, tags } = spec;
                    let document = TagDocument {
                        metric_id: metric_id.clone(),
                        tags,
                    };
                    index
                        .index(
                            &index_name,
                            DOCUMENT_TYPE,
                            &metric_id,
                            None,
                            Utc::now(),
                            &document,
                            false,
                        )
                        .await
                        .with_context(|| {
                            format!("failed to index tags for metric '{}'", metric_id)
                        })?;
                    forwarded.insert(metric_id);
                }
                None => return Ok(()),
            },
            Some(query) = backlog_queries.recv() => {
                query.answer(specs.len() as i64);
            }
            Some(query) = tracked_queries.recv() => {
                query.answer(recent.len() as i64);
                recent.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexError;
    use crate::stats::StatsRegistry;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every submitted document id.
    #[derive(Default)]
    struct RecordingIndex {
        ids: Mutex<Vec<String>>,
    }

    impl RecordingIndex {
        fn ids(&self) -> Vec<String> {
            self.ids.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TagIndex for RecordingIndex {
        async fn index(
            &self,
            _index_name: &str,
            _doc_type: &str,
            id: &str,
            _parent: Option<&str>,
            _timestamp: DateTime<Utc>,
            _document: &TagDocument,
            _refresh: bool,
        ) -> Result<(), IndexError> {
            self.ids.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    /// Always refuses the submission.
    struct FailingIndex;

    #[async_trait]
    impl TagIndex for FailingIndex {
        async fn index(
            &self,
            _index_name: &str,
            _doc_type: &str,
            id: &str,
            _parent: Option<&str>,
            _timestamp: DateTime<Utc>,
            _document: &TagDocument,
            _refresh: bool,
        ) -> Result<(), IndexError> {
            Err(IndexError::Rejected {
                id: id.to_string(),
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            })
        }
    }

    fn spec(id: &str) -> MetricSpec {
        let mut tags = HashMap::new();
        tags.insert("unit".to_string(), "ms".to_string());
        tags.insert("host".to_string(), "web1".to_string());
        MetricSpec {
            metric_id: id.to_string(),
            tags,
        }
    }

    async fn fetch(registry: &StatsRegistry, name: &str) -> i64 {
        registry
            .snapshot()
            .await
            .into_iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("stat '{}' missing from snapshot", name))
            .value
    }

    #[tokio::test]
    async fn test_proto2_forwards_each_identity_once() {
        let mut registry = StatsRegistry::new();
        let backlog = registry.queried("backlog");
        let tracked = registry.queried("tracked");
        let index = Arc::new(RecordingIndex::default());
        let (tx, rx) = mpsc::channel(16);

        let worker = tokio::spawn(track_proto2(
            rx,
            index.clone() as Arc<dyn TagIndex>,
            "graphite_metrics2".to_string(),
            backlog,
            tracked,
        ));

        for _ in 0..3 {
            tx.send(spec("host=web1.unit_is_ms")).await.unwrap();
        }
        tx.send(spec("host=web2.unit_is_ms")).await.unwrap();
        tx.send(spec("host=web1.unit_is_ms")).await.unwrap();
        drop(tx);

        worker.await.unwrap().unwrap();
        assert_eq!(
            index.ids(),
            vec!["host=web1.unit_is_ms", "host=web2.unit_is_ms"]
        );
    }

    #[tokio::test]
    async fn test_proto2_tracked_window_resets_on_query() {
        let mut registry = StatsRegistry::new();
        let backlog = registry.queried("backlog");
        let tracked = registry.queried("tracked");
        let index = Arc::new(RecordingIndex::default());
        let (tx, rx) = mpsc::channel(16);

        let worker = tokio::spawn(track_proto2(
            rx,
            index as Arc<dyn TagIndex>,
            "graphite_metrics2".to_string(),
            backlog,
            tracked,
        ));

        tx.send(spec("host=a.unit_is_ms")).await.unwrap();
        tx.send(spec("host=b.unit_is_ms")).await.unwrap();
        tx.send(spec("host=a.unit_is_ms")).await.unwrap();
        // Let the tracker absorb the sends before querying.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fetch(&registry, "tracked").await, 2);
        // The window was cleared by the previous read.
        assert_eq!(fetch(&registry, "tracked").await, 0);
        // Duplicates still land in the fresh window.
        tx.send(spec("host=a.unit_is_ms")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetch(&registry, "tracked").await, 1);

        drop(tx);
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_proto2_backlog_query_reports_queue_depth() {
        let mut registry = StatsRegistry::new();
        let backlog = registry.queried("backlog");
        let tracked = registry.queried("tracked");
        let index = Arc::new(RecordingIndex::default());
        let (tx, rx) = mpsc::channel(16);

        let worker = tokio::spawn(track_proto2(
            rx,
            index as Arc<dyn TagIndex>,
            "graphite_metrics2".to_string(),
            backlog,
            tracked,
        ));

        // An idle tracker has drained everything.
        tx.send(spec("host=a.unit_is_ms")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetch(&registry, "backlog").await, 0);

        drop(tx);
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_proto2_index_failure_is_fatal() {
        let mut registry = StatsRegistry::new();
        let backlog = registry.queried("backlog");
        let tracked = registry.queried("tracked");
        let (tx, rx) = mpsc::channel(16);

        let worker = tokio::spawn(track_proto2(
            rx,
            Arc::new(FailingIndex) as Arc<dyn TagIndex>,
            "graphite_metrics2".to_string(),
            backlog,
            tracked,
        ));

        tx.send(spec("host=a.unit_is_ms")).await.unwrap();
        let result = worker.await.unwrap();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("failed to index tags for metric")
        );
    }

    #[tokio::test]
    async fn test_proto1_distinct_count_resets_on_query() {
        let mut registry = StatsRegistry::new();
        let tracked = registry.queried("tracked");
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(track_proto1(rx, tracked));

        tx.send("servers.web1.load 0.85 100".to_string()).unwrap();
        tx.send("servers.web2.load 0.40 100".to_string()).unwrap();
        // Duplicate is absorbed silently.
        tx.send("servers.web1.load 0.85 100".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fetch(&registry, "tracked").await, 2);
        assert_eq!(fetch(&registry, "tracked").await, 0);

        drop(tx);
        worker.await.unwrap();
    }
}
