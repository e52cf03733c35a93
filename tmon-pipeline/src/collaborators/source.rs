//! Content source HTTP client
//!
//! - `GET {source_url}/search?q=&from-date=&to-date=` → line-delimited
//!   [`SourceMatch`] objects
//! - `GET {source_url}/body?url=` → `{"bodyText": "..."}`, 404 when the source
//!   has no body for the URL
//!
//! Requests are rate-limited with a direct governor quota so a burst of body
//! fetches after a large search stays within the source's allowance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tmon_common::wire::format_timestamp;
use tmon_common::SourceMatch;

use super::http::{read_ndjson, HttpTransport};
use super::SourceApi;
use crate::error::PipelineError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BodyResponse {
    body_text: Option<String>,
}

pub struct HttpSourceApi {
    transport: HttpTransport,
    api_key: Option<String>,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpSourceApi {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        requests_per_second: u32,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            transport: HttpTransport::new(base_url, timeout)?,
            api_key,
            rate_limiter: RateLimiter::direct(Quota::per_second(rate)),
        })
    }

    fn with_key(&self, mut query: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        if let Some(key) = &self.api_key {
            query.push(("api-key", key.clone()));
        }
        query
    }
}

#[async_trait]
impl SourceApi for HttpSourceApi {
    async fn search(
        &self,
        issue: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SourceMatch>, PipelineError> {
        self.rate_limiter.until_ready().await;

        let query = self.with_key(vec![
            ("q", issue.to_string()),
            ("from-date", format_timestamp(&start)),
            ("to-date", format_timestamp(&end)),
        ]);
        let response = self.transport.get(&["search"], &query).await?;
        let matches: Vec<SourceMatch> = read_ndjson(response).await?;

        tracing::debug!(
            issue,
            from = %format_timestamp(&start),
            to = %format_timestamp(&end),
            matches = matches.len(),
            "Source search returned"
        );
        Ok(matches)
    }

    async fn fetch_body(&self, url: &str) -> Result<String, PipelineError> {
        self.rate_limiter.until_ready().await;

        let query = self.with_key(vec![("url", url.to_string())]);
        let response = self
            .transport
            .get_optional(&["body"], &query)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("no body for {}", url)))?;
        let body: BodyResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Transient(format!("Malformed body response: {}", e)))?;

        match body.body_text {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(PipelineError::NotFound(format!("no body for {}", url))),
        }
    }
}
