//! Fixed-size batch delivery with unsent-remainder handback
//!
//! [`BatchDispatcher::send`] splits items into chunks of `batch_size` and
//! delivers them in order through the [`RetryPolicy`]. When a chunk exhausts
//! its retries, delivery to that destination stops for this call and the
//! failed chunk plus every chunk not yet tried come back as `unsent`, in
//! their original order. The caller keeps that remainder and prepends it to
//! the next send. Nothing is dropped, so delivery is at-least-once:
//! destinations must be idempotent on item id.

use async_trait::async_trait;
use chrono::Utc;
use tmon_common::events::{EventBus, PipelineEvent};

use super::retry::RetryPolicy;
use crate::error::PipelineError;

/// Named target a batch can be delivered to
#[async_trait]
pub trait Destination<T>: Send + Sync {
    /// Name used in logs and exhaustion reports
    fn name(&self) -> &str;

    /// Deliver one batch; one call is one attempt
    async fn deliver(&self, batch: &[T]) -> Result<(), PipelineError>;
}

/// What happened to one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Position of the batch within the send
    pub index: usize,
    pub size: usize,
    pub attempts: u32,
    pub delivered: bool,
}

/// Result of one [`BatchDispatcher::send`]
#[derive(Debug, Clone)]
pub struct DispatchReport<T> {
    pub destination: String,
    /// One entry per attempted batch
    pub outcomes: Vec<BatchOutcome>,
    /// Items acknowledged by the destination
    pub delivered: usize,
    /// Items the caller must retain and resend
    pub unsent: Vec<T>,
    /// Why delivery stopped, when it did
    pub error: Option<PipelineError>,
}

impl<T> DispatchReport<T> {
    pub fn is_complete(&self) -> bool {
        self.unsent.is_empty()
    }
}

#[derive(Clone)]
pub struct BatchDispatcher {
    retry: RetryPolicy,
    events: Option<EventBus>,
}

impl BatchDispatcher {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry, events: None }
    }

    /// Report exhaustion on the event bus as well as in logs
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Deliver `items` to `destination` in batches of `batch_size`
    ///
    /// A `batch_size` of zero is treated as one.
    pub async fn send<T>(
        &self,
        items: Vec<T>,
        destination: &dyn Destination<T>,
        batch_size: usize,
    ) -> DispatchReport<T>
    where
        T: Clone + Send + Sync,
    {
        let batch_size = batch_size.max(1);
        let name = destination.name().to_string();
        let mut report = DispatchReport {
            destination: name.clone(),
            outcomes: Vec::new(),
            delivered: 0,
            unsent: Vec::new(),
            error: None,
        };

        let mut offset = 0;
        for (index, chunk) in items.chunks(batch_size).enumerate() {
            let (result, attempts) = self
                .retry
                .attempt_counted(&name, || destination.deliver(chunk))
                .await;

            match result {
                Ok(()) => {
                    report.outcomes.push(BatchOutcome {
                        index,
                        size: chunk.len(),
                        attempts,
                        delivered: true,
                    });
                    report.delivered += chunk.len();
                    offset += chunk.len();
                }
                Err(err) => {
                    report.outcomes.push(BatchOutcome {
                        index,
                        size: chunk.len(),
                        attempts,
                        delivered: false,
                    });
                    report.unsent = items[offset..].to_vec();

                    tracing::error!(
                        destination = %name,
                        batch = index,
                        attempts,
                        unsent = report.unsent.len(),
                        error = %err,
                        "Batch delivery failed, retaining remainder"
                    );
                    if let Some(events) = &self.events {
                        events.emit_lossy(PipelineEvent::DeliveryExhausted {
                            destination: name.clone(),
                            attempts,
                            unsent: report.unsent.len(),
                            error: err.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                    report.error = Some(err);
                    break;
                }
            }
        }

        if report.is_complete() && !items.is_empty() {
            tracing::debug!(
                destination = %name,
                delivered = report.delivered,
                batches = report.outcomes.len(),
                "All batches delivered"
            );
        }

        report
    }
}
