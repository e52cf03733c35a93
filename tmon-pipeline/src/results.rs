//! Delivery of compute results to the requester
//!
//! Same discipline as article delivery: results go out in fixed-size batches
//! through the [`BatchDispatcher`], and whatever a failed send hands back is
//! kept per query key and prepended to the next dispatch for that key.
//!
//! Each key's remainder sits behind its own lock, so a slow or failing
//! requester delays only the key being delivered.
//!
//! Every dispatch ends with one best-effort notification: `topics_ready`
//! when all pending results for the key went out, `delivery_failed`
//! otherwise.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use tmon_common::events::{EventBus, PipelineEvent};
use tmon_common::{Notification, QueryKey, TopicResult};

use crate::collaborators::{NotificationSink, ResultDestination, ResultSink};
use crate::delivery::{BatchDispatcher, DispatchReport, RetryPolicy};

/// Notification statuses sent to the requester
pub mod status {
    pub const COMPLETED: &str = "completed";
    pub const TOPICS_READY: &str = "topics_ready";
    pub const DELIVERY_FAILED: &str = "delivery_failed";
}

pub struct ResultDispatcher {
    dispatcher: BatchDispatcher,
    sink: Arc<dyn ResultSink>,
    notifier: Arc<dyn NotificationSink>,
    batch_size: usize,
    pending: RwLock<HashMap<QueryKey, Arc<Mutex<Vec<TopicResult>>>>>,
    events: EventBus,
}

impl ResultDispatcher {
    pub fn new(
        dispatcher: BatchDispatcher,
        sink: Arc<dyn ResultSink>,
        notifier: Arc<dyn NotificationSink>,
        batch_size: usize,
        events: EventBus,
    ) -> Self {
        Self {
            dispatcher,
            sink,
            notifier,
            batch_size,
            pending: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Deliver `results` for `key`, after any remainder from earlier sends
    pub async fn dispatch(&self, key: &QueryKey, results: Vec<TopicResult>) -> DispatchReport<TopicResult> {
        let slot = self.slot(key).await;
        let mut remainder = slot.lock().await;

        let mut items = std::mem::take(&mut *remainder);
        let carried = items.len();
        items.extend(results);

        let destination = ResultDestination::new(self.sink.as_ref(), key);
        let report = self.dispatcher.send(items, &destination, self.batch_size).await;

        if report.is_complete() {
            drop(remainder);
            self.release(key, &slot).await;
            if report.delivered > 0 {
                tracing::info!(
                    key = %key,
                    delivered = report.delivered,
                    carried,
                    "Topic results delivered"
                );
                self.events.emit_lossy(PipelineEvent::ResultsDelivered {
                    key: key.clone(),
                    results: report.delivered,
                    timestamp: Utc::now(),
                });
                self.notify(
                    key,
                    status::TOPICS_READY,
                    format!("{} topic results delivered", report.delivered),
                )
                .await;
            }
        } else {
            let unsent = report.unsent.len();
            *remainder = report.unsent.clone();
            drop(remainder);

            tracing::error!(
                key = %key,
                delivered = report.delivered,
                retained = unsent,
                "Topic result delivery incomplete, retaining remainder"
            );
            self.notify(
                key,
                status::DELIVERY_FAILED,
                format!(
                    "{} topic results delivered, {} awaiting retry",
                    report.delivered, unsent
                ),
            )
            .await;
        }

        report
    }

    /// Resend the retained remainder for `key`, if any
    pub async fn retry_pending(&self, key: &QueryKey) -> Option<DispatchReport<TopicResult>> {
        if self.pending_count(key).await == 0 {
            return None;
        }
        Some(self.dispatch(key, Vec::new()).await)
    }

    pub async fn pending_count(&self, key: &QueryKey) -> usize {
        let slot = self.pending.read().await.get(key).cloned();
        match slot {
            Some(slot) => slot.lock().await.len(),
            None => 0,
        }
    }

    /// Keys with results awaiting redelivery
    pub async fn pending_keys(&self) -> usize {
        self.pending.read().await.len()
    }

    async fn slot(&self, key: &QueryKey) -> Arc<Mutex<Vec<TopicResult>>> {
        if let Some(slot) = self.pending.read().await.get(key) {
            return slot.clone();
        }
        self.pending
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Drop the slot for `key` once it is empty and nobody else holds it
    async fn release(&self, key: &QueryKey, slot: &Arc<Mutex<Vec<TopicResult>>>) {
        let mut pending = self.pending.write().await;
        let unused = match pending.get(key) {
            // Map entry plus our own handle
            Some(current) if Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2 => {
                slot.try_lock().map(|r| r.is_empty()).unwrap_or(false)
            }
            _ => false,
        };
        if unused {
            pending.remove(key);
        }
    }

    /// Best-effort status notification; failures are logged only
    pub async fn notify(&self, key: &QueryKey, status: &str, message: String) {
        let notification = Notification {
            issue: key.issue.clone(),
            requester: key.requester.clone(),
            status: status.to_string(),
            message,
        };
        send_notification(self.dispatcher.retry_policy(), self.notifier.as_ref(), &notification).await;
    }
}

/// Send one notification through `retry`, logging rather than propagating failure
pub async fn send_notification(
    retry: &RetryPolicy,
    notifier: &dyn NotificationSink,
    notification: &Notification,
) {
    match retry
        .attempt("notifications", || notifier.notify(notification))
        .await
    {
        Ok(()) => tracing::debug!(
            issue = %notification.issue,
            requester = %notification.requester,
            status = %notification.status,
            "Notification sent"
        ),
        Err(e) => tracing::warn!(
            issue = %notification.issue,
            requester = %notification.requester,
            status = %notification.status,
            error = %e,
            "Notification failed"
        ),
    }
}
