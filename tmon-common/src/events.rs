//! Pipeline event types and the broadcast EventBus
//!
//! Events are broadcast via [`EventBus`] and serialized for SSE transmission.
//! Nothing in the pipeline depends on an event being received; they exist so
//! operators can watch monitors, flushes and delivery failures live.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::QueryKey;

/// Pipeline event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A monitoring request was accepted and its poller spawned
    MonitorStarted {
        key: QueryKey,
        session_id: Uuid,
        #[serde(with = "crate::wire::timestamp")]
        start: DateTime<Utc>,
        #[serde(with = "crate::wire::optional_timestamp")]
        end: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    /// One poll cycle finished and the cursor advanced
    CycleCompleted {
        key: QueryKey,
        session_id: Uuid,
        /// Articles fetched successfully this cycle
        fetched: usize,
        /// Matches skipped because their body could not be fetched
        skipped: usize,
        /// Cursor after the cycle
        #[serde(with = "crate::wire::timestamp")]
        cursor: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// A bounded monitor reached the end of its window
    MonitorCompleted {
        key: QueryKey,
        session_id: Uuid,
        cycles: u64,
        articles: usize,
        timestamp: DateTime<Utc>,
    },

    /// A monitor was stopped before completing
    MonitorStopped {
        key: QueryKey,
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// An accumulation buffer was handed to compute successfully
    BufferFlushed {
        key: QueryKey,
        articles: usize,
        end_of_stream: bool,
        timestamp: DateTime<Utc>,
    },

    /// A flush failed; the buffer was retained
    FlushFailed {
        key: QueryKey,
        retained: usize,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Compute results reached the requester-facing sink
    ResultsDelivered {
        key: QueryKey,
        results: usize,
        timestamp: DateTime<Utc>,
    },

    /// A destination stayed unreachable through every retry attempt
    DeliveryExhausted {
        destination: String,
        attempts: u32,
        /// Items kept back for the next attempt
        unsent: usize,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            PipelineEvent::MonitorStarted { .. } => "MonitorStarted",
            PipelineEvent::CycleCompleted { .. } => "CycleCompleted",
            PipelineEvent::MonitorCompleted { .. } => "MonitorCompleted",
            PipelineEvent::MonitorStopped { .. } => "MonitorStopped",
            PipelineEvent::BufferFlushed { .. } => "BufferFlushed",
            PipelineEvent::FlushFailed { .. } => "FlushFailed",
            PipelineEvent::ResultsDelivered { .. } => "ResultsDelivered",
            PipelineEvent::DeliveryExhausted { .. } => "DeliveryExhausted",
        }
    }
}

/// Broadcast bus shared by every pipeline component
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
