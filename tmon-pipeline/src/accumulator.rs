//! Per-query accumulation buffers
//!
//! One [`AccumulationBuffer`] per [`QueryKey`], created lazily on the first
//! `accept`. A buffer flushes to the [`ComputeTrigger`] as soon as it holds
//! `threshold` articles or has seen end-of-stream, and is cleared only when
//! compute succeeds. On failure it is retained whole, so the next accept or a
//! manual [`Accumulator::retry_flush`] resends the same material plus
//! whatever arrived since.
//!
//! Each buffer sits behind its own async mutex, held across the flush: a
//! second accept for the same key waits for the in-flight flush to finish.
//! The outer map lock is only held to look up or insert a handle, so
//! different keys never contend on a flush.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use tmon_common::events::{EventBus, PipelineEvent};
use tmon_common::{Article, QueryKey};

use crate::compute::ComputeTrigger;
use crate::error::PipelineError;
use crate::results::ResultDispatcher;

/// Articles awaiting a compute flush for one key
#[derive(Debug)]
pub struct AccumulationBuffer {
    pub key: QueryKey,
    pub items: Vec<Article>,
    /// Sticky once set
    pub end_of_stream: bool,
    /// Removed from the map; holders must look the key up again
    retired: bool,
}

impl AccumulationBuffer {
    fn new(key: QueryKey) -> Self {
        Self {
            key,
            items: Vec::new(),
            end_of_stream: false,
            retired: false,
        }
    }
}

/// What an accept or manual flush did
#[derive(Debug, Clone)]
pub enum FlushOutcome {
    /// Appended; flush condition not met
    Buffered { size: usize },
    /// Compute succeeded and the buffer was cleared
    Flushed {
        articles: usize,
        results: usize,
        /// Results still waiting on the requester after this flush
        undelivered: usize,
    },
    /// Compute failed; the buffer was kept intact
    Retained { size: usize, error: PipelineError },
}

/// Where a poller hands each cycle's articles
#[async_trait]
pub trait ArticleStream: Send + Sync {
    async fn forward(&self, key: &QueryKey, items: Vec<Article>, end_of_stream: bool) -> FlushOutcome;
}

type BufferHandle = Arc<Mutex<AccumulationBuffer>>;

pub struct Accumulator {
    threshold: usize,
    compute: ComputeTrigger,
    results: Arc<ResultDispatcher>,
    buffers: RwLock<HashMap<QueryKey, BufferHandle>>,
    events: EventBus,
}

impl Accumulator {
    /// `threshold` of zero is treated as one
    pub fn new(
        threshold: usize,
        compute: ComputeTrigger,
        results: Arc<ResultDispatcher>,
        events: EventBus,
    ) -> Self {
        Self {
            threshold: threshold.max(1),
            compute,
            results,
            buffers: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Append `items` for `key` and flush if the buffer is due
    pub async fn accept(&self, key: &QueryKey, items: Vec<Article>, end_of_stream: bool) -> FlushOutcome {
        let mut buffer = self.lock_live(key).await;

        buffer.items.extend(items);
        buffer.end_of_stream |= end_of_stream;

        if buffer.items.len() < self.threshold && !buffer.end_of_stream {
            tracing::debug!(
                key = %key,
                size = buffer.items.len(),
                threshold = self.threshold,
                "Articles buffered"
            );
            return FlushOutcome::Buffered {
                size: buffer.items.len(),
            };
        }

        self.flush_locked(&mut buffer).await
    }

    /// Flush whatever `key` holds regardless of threshold, and resend any
    /// results the requester has not acknowledged
    pub async fn retry_flush(&self, key: &QueryKey) -> Result<FlushOutcome, PipelineError> {
        let handle = self.buffers.read().await.get(key).cloned();

        let Some(handle) = handle else {
            return match self.results.retry_pending(key).await {
                Some(report) => Ok(FlushOutcome::Flushed {
                    articles: 0,
                    results: report.delivered,
                    undelivered: report.unsent.len(),
                }),
                None => Err(PipelineError::NotFound(format!("no buffer for {}", key))),
            };
        };

        let mut buffer = handle.lock_owned().await;
        if buffer.retired {
            return Err(PipelineError::NotFound(format!("no buffer for {}", key)));
        }
        if buffer.items.is_empty() && !buffer.end_of_stream {
            let undelivered = match self.results.retry_pending(key).await {
                Some(report) => report.unsent.len(),
                None => 0,
            };
            if undelivered > 0 {
                tracing::warn!(key = %key, undelivered, "Results still pending after manual retry");
            }
            return Ok(FlushOutcome::Buffered { size: 0 });
        }

        Ok(self.flush_locked(&mut buffer).await)
    }

    /// Current buffer size for `key`, if a buffer exists
    pub async fn buffered(&self, key: &QueryKey) -> Option<usize> {
        let handle = self.buffers.read().await.get(key).cloned()?;
        let buffer = handle.lock().await;
        (!buffer.retired).then_some(buffer.items.len())
    }

    pub async fn active_buffers(&self) -> usize {
        self.buffers.read().await.len()
    }

    /// Lock the live buffer for `key`, creating it if needed
    async fn lock_live(&self, key: &QueryKey) -> OwnedMutexGuard<AccumulationBuffer> {
        loop {
            let existing = self.buffers.read().await.get(key).cloned();
            let handle = match existing {
                Some(handle) => handle,
                None => self
                    .buffers
                    .write()
                    .await
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(AccumulationBuffer::new(key.clone()))))
                    .clone(),
            };

            let guard = handle.lock_owned().await;
            if !guard.retired {
                return guard;
            }
            // Retired by an end-of-stream flush while we waited
        }
    }

    /// Caller holds the buffer lock for the whole flush
    async fn flush_locked(&self, buffer: &mut AccumulationBuffer) -> FlushOutcome {
        let key = buffer.key.clone();
        let end_of_stream = buffer.end_of_stream;

        if buffer.items.is_empty() {
            tracing::info!(key = %key, "End of stream with empty buffer, nothing to compute");
            self.retire(buffer).await;
            return FlushOutcome::Flushed {
                articles: 0,
                results: 0,
                undelivered: 0,
            };
        }

        let size = buffer.items.len();
        tracing::info!(key = %key, articles = size, end_of_stream, "Flushing buffer to compute");

        match self.compute.run(&buffer.items).await {
            Ok(results) => {
                buffer.items.clear();
                let result_count = results.len();

                self.events.emit_lossy(PipelineEvent::BufferFlushed {
                    key: key.clone(),
                    articles: size,
                    end_of_stream,
                    timestamp: Utc::now(),
                });

                let report = self.results.dispatch(&key, results).await;

                if end_of_stream {
                    self.retire(buffer).await;
                }

                FlushOutcome::Flushed {
                    articles: size,
                    results: result_count,
                    undelivered: report.unsent.len(),
                }
            }
            Err(error) => {
                tracing::error!(
                    key = %key,
                    retained = size,
                    error = %error,
                    "Compute failed, buffer retained"
                );
                self.events.emit_lossy(PipelineEvent::FlushFailed {
                    key,
                    retained: size,
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
                FlushOutcome::Retained { size, error }
            }
        }
    }

    async fn retire(&self, buffer: &mut AccumulationBuffer) {
        buffer.retired = true;
        self.buffers.write().await.remove(&buffer.key);
        tracing::debug!(key = %buffer.key, "Buffer retired");
    }
}

#[async_trait]
impl ArticleStream for Accumulator {
    async fn forward(&self, key: &QueryKey, items: Vec<Article>, end_of_stream: bool) -> FlushOutcome {
        self.accept(key, items, end_of_stream).await
    }
}
