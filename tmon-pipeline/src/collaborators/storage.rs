//! Document store and search index HTTP clients
//!
//! Document store:
//! - `POST {storage_url}/collections/{c}/articles` (line-delimited articles)
//! - `POST {storage_url}/collections/{c}/lookup` (line-delimited `{"id"}`) →
//!   line-delimited articles
//!
//! Search index:
//! - `POST {search_url}/collections/{c}/index` (line-delimited articles)
//! - `GET {search_url}/collections/{c}/query?text=&from=&to=` →
//!   line-delimited `{"id"}`
//!
//! Both services are expected to upsert by article id, which is what makes
//! at-least-once batch delivery safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tmon_common::wire::format_timestamp;
use tmon_common::Article;

use super::http::{read_ndjson, HttpTransport};
use super::{SearchAdapter, StorageAdapter};
use crate::error::PipelineError;

#[derive(Debug, Serialize, Deserialize)]
struct IdLine {
    id: String,
}

pub struct HttpStorageAdapter {
    transport: HttpTransport,
}

impl HttpStorageAdapter {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PipelineError> {
        Ok(Self {
            transport: HttpTransport::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl StorageAdapter for HttpStorageAdapter {
    async fn save(&self, batch: &[Article], collection: &str) -> Result<(), PipelineError> {
        self.transport
            .post_ndjson(&["collections", collection, "articles"], &[], batch)
            .await?;
        Ok(())
    }

    async fn fetch(&self, ids: &[String], collection: &str) -> Result<Vec<Article>, PipelineError> {
        let lines: Vec<IdLine> = ids.iter().map(|id| IdLine { id: id.clone() }).collect();
        let response = self
            .transport
            .post_ndjson(&["collections", collection, "lookup"], &[], &lines)
            .await?;
        read_ndjson(response).await
    }
}

pub struct HttpSearchAdapter {
    transport: HttpTransport,
}

impl HttpSearchAdapter {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PipelineError> {
        Ok(Self {
            transport: HttpTransport::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl SearchAdapter for HttpSearchAdapter {
    async fn index(&self, batch: &[Article], collection: &str) -> Result<(), PipelineError> {
        self.transport
            .post_ndjson(&["collections", collection, "index"], &[], batch)
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        text: &str,
        collection: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>, PipelineError> {
        let mut query = vec![("text", text.to_string())];
        if let Some(start) = start {
            query.push(("from", format_timestamp(&start)));
        }
        if let Some(end) = end {
            query.push(("to", format_timestamp(&end)));
        }

        let response = self
            .transport
            .get(&["collections", collection, "query"], &query)
            .await?;
        let ids: Vec<IdLine> = read_ndjson(response).await?;
        Ok(ids.into_iter().map(|line| line.id).collect())
    }
}
