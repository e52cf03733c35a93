//! Per-query source polling
//!
//! A [`SourcePoller`] owns one [`MonitoringWindow`] and runs it through
//! `Idle → Polling → Sleeping → {Polling | Completed}` until the bounded
//! window is covered or the cancellation token fires.
//!
//! **Cycle:**
//! 1. Upper edge = bound end if set, else now
//! 2. Search the source for matches in `[cursor, upper]`
//! 3. Fetch each body independently; a failed or empty body skips that match
//! 4. Deliver the cycle's articles (after any earlier remainder) to storage
//!    and the search index; keep whatever comes back unsent
//! 5. Forward the articles to the accumulation stream
//! 6. Advance the cursor to the upper edge
//!
//! A search that exhausts its retries leaves the cursor where it was, so the
//! same window is asked for again next cycle. Per-article fetch failures do
//! not hold the cursor back: those articles are not retried.
//!
//! Cancellation interrupts `Sleeping` immediately. A cycle already in
//! progress runs to the end before the stop is observed. A stopped poller
//! still signals end-of-stream, so articles buffered below the threshold
//! reach compute and the key's buffer is retired.

mod window;

pub use window::MonitoringWindow;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tmon_common::config::PollerConfig;
use tmon_common::events::{EventBus, PipelineEvent};
use tmon_common::{Article, MonitorState, Notification, QueryKey};

use crate::accumulator::{ArticleStream, FlushOutcome};
use crate::collaborators::{NotificationSink, SourceApi};
use crate::delivery::{BatchDispatcher, Destination, RetryPolicy};
use crate::error::PipelineError;
use crate::results::{send_notification, status};

/// Body fetches in flight per cycle
const BODY_FETCH_WORKERS: usize = 4;

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub completion_drain_attempts: u32,
}

impl PollerSettings {
    pub fn from_config(config: &PollerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            batch_size: config.batch_size,
            completion_drain_attempts: config.completion_drain_attempts,
        }
    }
}

/// Observable progress of one monitor
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub issue: String,
    pub requester: String,
    pub session_id: Uuid,
    pub state: MonitorState,
    #[serde(with = "tmon_common::wire::timestamp")]
    pub cursor: DateTime<Utc>,
    #[serde(with = "tmon_common::wire::optional_timestamp")]
    pub end: Option<DateTime<Utc>>,
    pub cycles: u64,
    pub articles: usize,
    pub skipped: usize,
    /// Undelivered articles per destination name
    pub pending: BTreeMap<String, usize>,
}

/// Collaborators shared by every poller the process spawns
#[derive(Clone)]
pub struct PollerDeps {
    pub source: Arc<dyn SourceApi>,
    pub destinations: Vec<Arc<dyn Destination<Article>>>,
    pub stream: Arc<dyn ArticleStream>,
    pub notifier: Arc<dyn NotificationSink>,
    pub dispatcher: BatchDispatcher,
    pub settings: PollerSettings,
    pub events: EventBus,
}

/// A destination and the articles it has not yet acknowledged
struct DestinationState {
    destination: Arc<dyn Destination<Article>>,
    pending: Vec<Article>,
}

#[derive(Debug, Default, Clone, Copy)]
struct CycleStats {
    fetched: usize,
    skipped: usize,
}

pub struct SourcePoller {
    window: MonitoringWindow,
    session_id: Uuid,
    source: Arc<dyn SourceApi>,
    destinations: Vec<DestinationState>,
    stream: Arc<dyn ArticleStream>,
    notifier: Arc<dyn NotificationSink>,
    dispatcher: BatchDispatcher,
    settings: PollerSettings,
    status: Arc<RwLock<MonitorStatus>>,
    events: EventBus,
    cycles: u64,
    articles: usize,
    skipped: usize,
}

impl SourcePoller {
    pub fn new(deps: &PollerDeps, window: MonitoringWindow, session_id: Uuid) -> Self {
        let destinations: Vec<DestinationState> = deps
            .destinations
            .iter()
            .map(|destination| DestinationState {
                destination: destination.clone(),
                pending: Vec::new(),
            })
            .collect();

        let status = MonitorStatus {
            issue: window.key.issue.clone(),
            requester: window.key.requester.clone(),
            session_id,
            state: window.state(),
            cursor: window.cursor(),
            end: window.bound_end(),
            cycles: 0,
            articles: 0,
            skipped: 0,
            pending: destinations
                .iter()
                .map(|d| (d.destination.name().to_string(), 0))
                .collect(),
        };

        Self {
            window,
            session_id,
            source: deps.source.clone(),
            destinations,
            stream: deps.stream.clone(),
            notifier: deps.notifier.clone(),
            dispatcher: deps.dispatcher.clone(),
            settings: deps.settings.clone(),
            status: Arc::new(RwLock::new(status)),
            events: deps.events.clone(),
            cycles: 0,
            articles: 0,
            skipped: 0,
        }
    }

    /// Shared view of this poller's progress
    pub fn status_handle(&self) -> Arc<RwLock<MonitorStatus>> {
        self.status.clone()
    }

    pub fn key(&self) -> &QueryKey {
        &self.window.key
    }

    fn retry(&self) -> &RetryPolicy {
        self.dispatcher.retry_policy()
    }

    /// Run until the window completes or `cancel` fires
    ///
    /// Returns the terminal state: `Completed` or `Stopped`.
    pub async fn run(mut self, cancel: CancellationToken) -> MonitorState {
        tracing::info!(
            key = %self.window.key,
            session_id = %self.session_id,
            cursor = %self.window.cursor(),
            end = ?self.window.bound_end(),
            "Monitor started"
        );

        loop {
            if cancel.is_cancelled() {
                return self.stopped().await;
            }

            self.transition_to(MonitorState::Polling).await;
            let upper = self.window.upper_edge(Utc::now());

            match self.poll_cycle(upper).await {
                Ok(stats) => {
                    self.window.advance(upper);
                    self.cycles += 1;
                    self.articles += stats.fetched;
                    self.skipped += stats.skipped;
                    self.publish_status().await;

                    tracing::info!(
                        key = %self.window.key,
                        session_id = %self.session_id,
                        cycle = self.cycles,
                        fetched = stats.fetched,
                        skipped = stats.skipped,
                        cursor = %self.window.cursor(),
                        "Poll cycle completed"
                    );
                    self.events.emit_lossy(PipelineEvent::CycleCompleted {
                        key: self.window.key.clone(),
                        session_id: self.session_id,
                        fetched: stats.fetched,
                        skipped: stats.skipped,
                        cursor: self.window.cursor(),
                        timestamp: Utc::now(),
                    });

                    if self.window.reaches_end(upper) {
                        return self.complete(&cancel).await;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        key = %self.window.key,
                        session_id = %self.session_id,
                        cursor = %self.window.cursor(),
                        error = %e,
                        "Source search failed, window will be polled again"
                    );
                }
            }

            self.transition_to(MonitorState::Sleeping).await;
            tokio::select! {
                _ = cancel.cancelled() => return self.stopped().await,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }

    async fn poll_cycle(&mut self, upper: DateTime<Utc>) -> Result<CycleStats, PipelineError> {
        let key = self.window.key.clone();
        let cursor = self.window.cursor();

        let source = self.source.clone();
        let matches = self
            .retry()
            .attempt("source:search", || source.search(&key.issue, cursor, upper))
            .await?;

        let total = matches.len();
        let retry = self.retry().clone();
        let fetched: Vec<Option<Article>> = stream::iter(matches)
            .map(|hit| {
                let source = source.clone();
                let retry = retry.clone();
                let key = &key;
                async move {
                    let body = retry
                        .attempt("source:body", || source.fetch_body(&hit.url))
                        .await;
                    match body {
                        Ok(body) => match Article::from_match(key, hit, body) {
                            Ok(article) => Some(article),
                            Err(e) => {
                                tracing::warn!(key = %key, error = %e, "Discarding incomplete article");
                                None
                            }
                        },
                        Err(e) => {
                            tracing::warn!(
                                key = %key,
                                id = %hit.id,
                                url = %hit.url,
                                error = %e,
                                "Body fetch failed, skipping match"
                            );
                            None
                        }
                    }
                }
            })
            .buffered(BODY_FETCH_WORKERS)
            .collect()
            .await;

        let articles: Vec<Article> = fetched.into_iter().flatten().collect();
        let stats = CycleStats {
            fetched: articles.len(),
            skipped: total - articles.len(),
        };

        self.deliver(articles.clone()).await;

        if !articles.is_empty() {
            self.stream.forward(&key, articles, false).await;
        }

        Ok(stats)
    }

    /// Send `articles` after each destination's remainder; keep what comes back
    async fn deliver(&mut self, articles: Vec<Article>) {
        for state in &mut self.destinations {
            let mut items = std::mem::take(&mut state.pending);
            items.extend(articles.iter().cloned());
            if items.is_empty() {
                continue;
            }

            let report = self
                .dispatcher
                .send(items, state.destination.as_ref(), self.settings.batch_size)
                .await;
            state.pending = report.unsent;
        }
    }

    fn pending_total(&self) -> usize {
        self.destinations.iter().map(|d| d.pending.len()).sum()
    }

    /// Drain remainders, signal end-of-stream and notify
    async fn complete(&mut self, cancel: &CancellationToken) -> MonitorState {
        let mut round = 0;
        while self.pending_total() > 0 && round < self.settings.completion_drain_attempts {
            round += 1;
            tracing::info!(
                key = %self.window.key,
                round,
                pending = self.pending_total(),
                "Draining undelivered articles before completion"
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
            self.deliver(Vec::new()).await;
            self.publish_status().await;
        }

        for state in &self.destinations {
            if !state.pending.is_empty() {
                tracing::error!(
                    key = %self.window.key,
                    session_id = %self.session_id,
                    destination = state.destination.name(),
                    undelivered = state.pending.len(),
                    "Monitor completing with undelivered articles"
                );
            }
        }

        self.stream.forward(&self.window.key, Vec::new(), true).await;
        self.transition_to(MonitorState::Completed).await;

        tracing::info!(
            key = %self.window.key,
            session_id = %self.session_id,
            cycles = self.cycles,
            articles = self.articles,
            "Monitor completed"
        );
        self.events.emit_lossy(PipelineEvent::MonitorCompleted {
            key: self.window.key.clone(),
            session_id: self.session_id,
            cycles: self.cycles,
            articles: self.articles,
            timestamp: Utc::now(),
        });

        let notification = Notification {
            issue: self.window.key.issue.clone(),
            requester: self.window.key.requester.clone(),
            status: status::COMPLETED.to_string(),
            message: format!(
                "Monitoring finished after {} cycles with {} articles",
                self.cycles, self.articles
            ),
        };
        send_notification(self.retry(), self.notifier.as_ref(), &notification).await;

        MonitorState::Completed
    }

    async fn stopped(&mut self) -> MonitorState {
        let outcome = self.stream.forward(&self.window.key, Vec::new(), true).await;
        if let FlushOutcome::Retained { size, error } = &outcome {
            tracing::warn!(
                key = %self.window.key,
                retained = size,
                error = %error,
                "Final flush on stop failed, buffer kept for manual retry"
            );
        }
        self.transition_to(MonitorState::Stopped).await;

        tracing::info!(
            key = %self.window.key,
            session_id = %self.session_id,
            cycles = self.cycles,
            pending = self.pending_total(),
            "Monitor stopped"
        );
        self.events.emit_lossy(PipelineEvent::MonitorStopped {
            key: self.window.key.clone(),
            session_id: self.session_id,
            timestamp: Utc::now(),
        });

        MonitorState::Stopped
    }

    async fn transition_to(&mut self, state: MonitorState) {
        self.window.transition_to(state);
        self.publish_status().await;
    }

    async fn publish_status(&self) {
        let mut status = self.status.write().await;
        status.state = self.window.state();
        status.cursor = self.window.cursor();
        status.cycles = self.cycles;
        status.articles = self.articles;
        status.skipped = self.skipped;
        status.pending = self
            .destinations
            .iter()
            .map(|d| (d.destination.name().to_string(), d.pending.len()))
            .collect();
    }
}
