//! External collaborator contracts
//!
//! The pipeline depends only on these traits. Production wiring uses the
//! HTTP clients in the submodules; tests substitute in-memory fakes.
//!
//! Each trait method is a single attempt. Callers wrap them in
//! [`RetryPolicy`](crate::delivery::RetryPolicy).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tmon_common::{Article, CorpusDocument, DocumentTopics, Notification, QueryKey, SourceMatch, TopicResult};

use crate::delivery::Destination;
use crate::error::PipelineError;

pub mod http;
pub mod requester;
pub mod source;
pub mod storage;
pub mod engine;

pub use engine::HttpComputeEngine;
pub use requester::HttpRequesterSink;
pub use source::HttpSourceApi;
pub use storage::{HttpSearchAdapter, HttpStorageAdapter};

/// Content source searched by the poller
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// Matches for `issue` published within `[start, end]`
    async fn search(
        &self,
        issue: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SourceMatch>, PipelineError>;

    /// Full body text; `PipelineError::NotFound` when the source has none
    async fn fetch_body(&self, url: &str) -> Result<String, PipelineError>;
}

/// Document store
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn save(&self, batch: &[Article], collection: &str) -> Result<(), PipelineError>;

    /// Resolve ids to stored articles; unknown ids are simply absent
    async fn fetch(&self, ids: &[String], collection: &str) -> Result<Vec<Article>, PipelineError>;
}

/// Full-text search index
#[async_trait]
pub trait SearchAdapter: Send + Sync {
    async fn index(&self, batch: &[Article], collection: &str) -> Result<(), PipelineError>;

    /// Ids of indexed articles matching `text`, optionally within a window
    async fn query(
        &self,
        text: &str,
        collection: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>, PipelineError>;
}

/// Parameters for one topic extraction run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeParameters {
    pub num_topics: usize,
    pub num_top_words: usize,
    /// Fixed seed; without one identical corpora may yield different topics
    pub seed: Option<u64>,
}

/// Opaque topic extraction capability
#[async_trait]
pub trait ComputeEngine: Send + Sync {
    async fn extract_topics(
        &self,
        corpus: &[CorpusDocument],
        params: &ComputeParameters,
    ) -> Result<Vec<DocumentTopics>, PipelineError>;
}

/// Requester-facing sink receiving topic results
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn deliver_results(
        &self,
        key: &QueryKey,
        batch: &[TopicResult],
    ) -> Result<(), PipelineError>;
}

/// Requester-facing status notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), PipelineError>;
}

/// Storage as a batch destination for one collection
pub struct StorageDestination {
    storage: Arc<dyn StorageAdapter>,
    collection: String,
    name: String,
}

impl StorageDestination {
    pub fn new(storage: Arc<dyn StorageAdapter>, collection: impl Into<String>) -> Self {
        let collection = collection.into();
        Self {
            storage,
            name: format!("storage:{}", collection),
            collection,
        }
    }
}

#[async_trait]
impl Destination<Article> for StorageDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, batch: &[Article]) -> Result<(), PipelineError> {
        self.storage.save(batch, &self.collection).await
    }
}

/// Search index as a batch destination for one collection
pub struct IndexDestination {
    search: Arc<dyn SearchAdapter>,
    collection: String,
    name: String,
}

impl IndexDestination {
    pub fn new(search: Arc<dyn SearchAdapter>, collection: impl Into<String>) -> Self {
        let collection = collection.into();
        Self {
            search,
            name: format!("index:{}", collection),
            collection,
        }
    }
}

#[async_trait]
impl Destination<Article> for IndexDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, batch: &[Article]) -> Result<(), PipelineError> {
        self.search.index(batch, &self.collection).await
    }
}

/// Result sink bound to one query key
pub struct ResultDestination<'a> {
    sink: &'a dyn ResultSink,
    key: &'a QueryKey,
    name: String,
}

impl<'a> ResultDestination<'a> {
    pub fn new(sink: &'a dyn ResultSink, key: &'a QueryKey) -> Self {
        Self {
            sink,
            key,
            name: format!("results:{}", key),
        }
    }
}

#[async_trait]
impl<'a> Destination<TopicResult> for ResultDestination<'a> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, batch: &[TopicResult]) -> Result<(), PipelineError> {
        self.sink.deliver_results(self.key, batch).await
    }
}
