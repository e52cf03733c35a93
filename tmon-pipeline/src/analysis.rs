//! On-demand topic analysis over already stored articles
//!
//! Resolves a free-text query to article ids through the search index,
//! loads the articles from the document store, and runs them through the
//! same compute and result delivery path as a flushed buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use tmon_common::QueryKey;

use crate::collaborators::{SearchAdapter, StorageAdapter};
use crate::compute::ComputeTrigger;
use crate::delivery::RetryPolicy;
use crate::error::PipelineError;
use crate::results::ResultDispatcher;

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisRequest {
    pub issue: String,
    pub requester: String,
    pub text: String,
    #[serde(default, with = "tmon_common::wire::optional_timestamp")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, with = "tmon_common::wire::optional_timestamp")]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub issue: String,
    pub requester: String,
    /// Ids returned by the search index
    pub matched: usize,
    /// Articles the document store resolved
    pub resolved: usize,
    pub results: usize,
    pub delivered: usize,
    pub undelivered: usize,
}

pub struct Analysis {
    search: Arc<dyn SearchAdapter>,
    storage: Arc<dyn StorageAdapter>,
    compute: ComputeTrigger,
    results: Arc<ResultDispatcher>,
    retry: RetryPolicy,
    collection: String,
}

impl Analysis {
    pub fn new(
        search: Arc<dyn SearchAdapter>,
        storage: Arc<dyn StorageAdapter>,
        compute: ComputeTrigger,
        results: Arc<ResultDispatcher>,
        retry: RetryPolicy,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            search,
            storage,
            compute,
            results,
            retry,
            collection: collection.into(),
        }
    }

    pub async fn run(&self, request: AnalysisRequest) -> Result<AnalysisReport, PipelineError> {
        let key = QueryKey::new(request.issue, request.requester)?;
        if request.text.trim().is_empty() {
            return Err(PipelineError::Validation("text must not be empty".to_string()));
        }
        if let (Some(start), Some(end)) = (request.start, request.end) {
            if end < start {
                return Err(PipelineError::Validation(format!(
                    "window end {} precedes start {}",
                    end, start
                )));
            }
        }

        let mut report = AnalysisReport {
            issue: key.issue.clone(),
            requester: key.requester.clone(),
            matched: 0,
            resolved: 0,
            results: 0,
            delivered: 0,
            undelivered: 0,
        };

        let search = &self.search;
        let collection = self.collection.as_str();
        let ids = self
            .retry
            .attempt("search:query", || {
                search.query(&request.text, collection, request.start, request.end)
            })
            .await?;
        report.matched = ids.len();

        if ids.is_empty() {
            tracing::info!(key = %key, text = %request.text, "Analysis query matched nothing");
            return Ok(report);
        }

        let storage = &self.storage;
        let articles = self
            .retry
            .attempt("storage:lookup", || storage.fetch(&ids, collection))
            .await?;
        report.resolved = articles.len();

        let found: HashSet<&str> = articles.iter().map(|a| a.id.as_str()).collect();
        let missing = ids.iter().filter(|id| !found.contains(id.as_str())).count();
        if missing > 0 {
            tracing::warn!(key = %key, missing, "Indexed ids not found in storage, skipping");
        }

        if articles.is_empty() {
            return Ok(report);
        }

        let results = self.compute.run(&articles).await?;
        report.results = results.len();

        let dispatch = self.results.dispatch(&key, results).await;
        report.delivered = dispatch.delivered;
        report.undelivered = dispatch.unsent.len();

        tracing::info!(
            key = %key,
            matched = report.matched,
            resolved = report.resolved,
            delivered = report.delivered,
            "Analysis completed"
        );
        Ok(report)
    }
}
