//! Topic extraction service client
//!
//! `POST {compute_url}/topics?numTopics=&numTopWords=[&seed=]` with the
//! line-delimited corpus; the response carries one `{"id","topWords"}` line
//! per document.

use async_trait::async_trait;
use std::time::Duration;
use tmon_common::{CorpusDocument, DocumentTopics};

use super::http::{read_ndjson, HttpTransport};
use super::{ComputeEngine, ComputeParameters};
use crate::error::PipelineError;

pub struct HttpComputeEngine {
    transport: HttpTransport,
}

impl HttpComputeEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PipelineError> {
        Ok(Self {
            transport: HttpTransport::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl ComputeEngine for HttpComputeEngine {
    async fn extract_topics(
        &self,
        corpus: &[CorpusDocument],
        params: &ComputeParameters,
    ) -> Result<Vec<DocumentTopics>, PipelineError> {
        let mut query = vec![
            ("numTopics", params.num_topics.to_string()),
            ("numTopWords", params.num_top_words.to_string()),
        ];
        if let Some(seed) = params.seed {
            query.push(("seed", seed.to_string()));
        }

        let response = self.transport.post_ndjson(&["topics"], &query, corpus).await?;
        read_ndjson(response).await
    }
}
