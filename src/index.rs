//! Tag index collaborator (Elasticsearch)
//!
//! The pipeline only needs the [`TagIndex`] seam: submit one tag document
//! per metric identity and report success or failure synchronously. The
//! shipped implementation talks to a single Elasticsearch node; durability,
//! batching and retries are that store's business, not ours. A synchronous
//! error here means the index is misconfigured or unreachable, which the
//! caller treats as fatal.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Document type every metric is indexed under.
pub const DOCUMENT_TYPE: &str = "metric";

/// The body stored for one metric identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagDocument {
    pub metric_id: String,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to reach the tag index: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("tag index rejected document '{id}' with status {status}")]
    Rejected {
        id: String,
        status: reqwest::StatusCode,
    },
}

/// Outbound interface to the indexing collaborator.
#[async_trait]
pub trait TagIndex: Send + Sync {
    /// Submit one metric's tag document.
    ///
    /// `parent` and `refresh` mirror the index API; the daemon always
    /// passes `None` and `false` (no parent documents, and the store's
    /// regular refresh cycle is soon enough).
    #[allow(clippy::too_many_arguments)]
    async fn index(
        &self,
        index_name: &str,
        doc_type: &str,
        id: &str,
        parent: Option<&str>,
        timestamp: DateTime<Utc>,
        document: &TagDocument,
        refresh: bool,
    ) -> Result<(), IndexError>;
}

/// [`TagIndex`] backed by a single Elasticsearch node over HTTP.
#[derive(Debug, Clone)]
pub struct ElasticIndex {
    client: reqwest::Client,
    base_url: String,
}

impl ElasticIndex {
    /// `base_url` is the node root, e.g. `http://localhost:9200`.
    pub fn new(base_url: String) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl TagIndex for ElasticIndex {
    async fn index(
        &self,
        index_name: &str,
        doc_type: &str,
        id: &str,
        parent: Option<&str>,
        timestamp: DateTime<Utc>,
        document: &TagDocument,
        refresh: bool,
    ) -> Result<(), IndexError> {
        let url = format!("{}/{}/{}/{}", self.base_url, index_name, doc_type, id);
        let mut request = self
            .client
            .put(&url)
            .query(&[
                ("timestamp", timestamp.to_rfc3339()),
                ("refresh", refresh.to_string()),
            ])
            .json(document);
        if let Some(parent) = parent {
            request = request.query(&[("parent", parent)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IndexError::Rejected {
                id: id.to_string(),
                status,
            });
        }
        Ok(())
    }
}
