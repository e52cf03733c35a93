//! Shared HTTP plumbing for collaborator clients
//!
//! Batch payloads go out as line-delimited JSON via POST. Any non-success
//! status is a transient failure. Only [`HttpTransport::get_optional`] reads
//! 404 as a permanent miss.

use reqwest::{Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tmon_common::wire::{from_ndjson, to_ndjson, NDJSON_CONTENT_TYPE};

use crate::error::PipelineError;

const USER_AGENT: &str = concat!("tmon-pipeline/", env!("CARGO_PKG_VERSION"));

/// reqwest client bound to one collaborator base URL
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Transient(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Base URL extended with percent-encoded path segments
    pub fn url(&self, segments: &[&str]) -> Result<Url, PipelineError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| PipelineError::Transient(format!("Invalid base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| PipelineError::Transient(format!("Base URL {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// POST `items` as line-delimited JSON and return the checked response
    pub async fn post_ndjson<T: Serialize>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
        items: &[T],
    ) -> Result<Response, PipelineError> {
        let body = to_ndjson(items)?;
        let url = self.url(segments)?;

        tracing::debug!(url = %url, lines = items.len(), "POST line-delimited batch");

        let response = self
            .client
            .post(url)
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        check_status(response).await
    }

    /// GET the path and return the checked response
    pub async fn get(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Response, PipelineError> {
        let url = self.url(segments)?;
        tracing::debug!(url = %url, "GET");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        check_status(response).await
    }

    /// GET the path; `None` when the collaborator answers 404
    pub async fn get_optional(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<Option<Response>, PipelineError> {
        let url = self.url(segments)?;
        tracing::debug!(url = %url, "GET");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_status(response).await.map(Some)
    }

    fn send_error(&self, err: reqwest::Error) -> PipelineError {
        if err.is_timeout() {
            PipelineError::Timeout(self.timeout)
        } else {
            PipelineError::from(err)
        }
    }
}

/// Map HTTP status onto the retry taxonomy
pub async fn check_status(response: Response) -> Result<Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let error_text = response.text().await.unwrap_or_default();

    Err(PipelineError::Transient(format!(
        "{} returned {}: {}",
        url,
        status.as_u16(),
        error_text.trim()
    )))
}

/// Decode a line-delimited JSON response body
pub async fn read_ndjson<T: DeserializeOwned>(response: Response) -> Result<Vec<T>, PipelineError> {
    let body = response.text().await?;
    // A collaborator sending garbage is treated like a failed call
    from_ndjson(&body).map_err(|e| PipelineError::Transient(e.to_string()))
}
