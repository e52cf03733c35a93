//! Requester-facing HTTP client
//!
//! - `POST {requester_url}/results/{issue}/{requester}` (line-delimited
//!   topic results)
//! - `POST {requester_url}/notifications` (one notification line)

use async_trait::async_trait;
use std::time::Duration;
use tmon_common::{Notification, QueryKey, TopicResult};

use super::http::HttpTransport;
use super::{NotificationSink, ResultSink};
use crate::error::PipelineError;

pub struct HttpRequesterSink {
    transport: HttpTransport,
}

impl HttpRequesterSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PipelineError> {
        Ok(Self {
            transport: HttpTransport::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl ResultSink for HttpRequesterSink {
    async fn deliver_results(
        &self,
        key: &QueryKey,
        batch: &[TopicResult],
    ) -> Result<(), PipelineError> {
        self.transport
            .post_ndjson(&["results", key.issue.as_str(), key.requester.as_str()], &[], batch)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for HttpRequesterSink {
    async fn notify(&self, notification: &Notification) -> Result<(), PipelineError> {
        self.transport
            .post_ndjson(&["notifications"], &[], std::slice::from_ref(notification))
            .await?;
        Ok(())
    }
}
