//! Test Helper Utilities
//!
//! In-memory collaborators with scripted failures, plus builders for
//! articles, configs and pipeline wiring.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tmon_common::config::TomlConfig;
use tmon_common::events::EventBus;
use tmon_common::{
    Article, CorpusDocument, DocumentTopics, Notification, QueryKey, SourceMatch, TopicResult,
};
use tmon_pipeline::accumulator::Accumulator;
use tmon_pipeline::collaborators::{
    ComputeEngine, ComputeParameters, IndexDestination, NotificationSink, ResultSink, SearchAdapter,
    SourceApi, StorageAdapter, StorageDestination,
};
use tmon_pipeline::compute::ComputeTrigger;
use tmon_pipeline::delivery::{BatchDispatcher, Destination, RetryPolicy};
use tmon_pipeline::poller::{PollerDeps, PollerSettings};
use tmon_pipeline::results::ResultDispatcher;
use tmon_pipeline::{Collaborators, PipelineError};

/// Decrement a scripted failure counter; true while failures remain
fn take_failure(counter: &Mutex<u32>) -> bool {
    let mut remaining = counter.lock().unwrap();
    if *remaining > 0 {
        *remaining -= 1;
        true
    } else {
        false
    }
}

pub fn key(issue: &str, requester: &str) -> QueryKey {
    QueryKey::new(issue, requester).unwrap()
}

pub fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

pub fn hit(id: &str) -> SourceMatch {
    SourceMatch {
        id: id.to_string(),
        title: format!("Title {}", id),
        url: format!("https://source.example/{}", id),
        section_id: "politics".to_string(),
        section_name: "Politics".to_string(),
        publication_timestamp: ts(1, 9),
    }
}

pub fn article(key: &QueryKey, id: &str) -> Article {
    Article::from_match(key, hit(id), format!("Body of {} about {}", id, key.issue)).unwrap()
}

/// Content source serving a fixed match list
#[derive(Default)]
pub struct FakeSource {
    pub matches: Mutex<Vec<SourceMatch>>,
    /// URLs whose body fetch fails
    pub broken_urls: Mutex<HashSet<String>>,
    /// Number of upcoming searches to fail
    pub search_failures: Mutex<u32>,
    /// Windows searched, in order
    pub searches: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl FakeSource {
    pub fn with_matches(ids: &[&str]) -> Self {
        let source = Self::default();
        *source.matches.lock().unwrap() = ids.iter().map(|id| hit(id)).collect();
        source
    }

    pub fn break_body(&self, id: &str) {
        self.broken_urls
            .lock()
            .unwrap()
            .insert(format!("https://source.example/{}", id));
    }
}

#[async_trait]
impl SourceApi for FakeSource {
    async fn search(
        &self,
        _issue: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SourceMatch>, PipelineError> {
        self.searches.lock().unwrap().push((start, end));
        if take_failure(&self.search_failures) {
            return Err(PipelineError::Transient("source unavailable".to_string()));
        }
        Ok(self.matches.lock().unwrap().clone())
    }

    async fn fetch_body(&self, url: &str) -> Result<String, PipelineError> {
        if self.broken_urls.lock().unwrap().contains(url) {
            return Err(PipelineError::NotFound(format!("no body for {}", url)));
        }
        Ok(format!("Body of {}", url))
    }
}

/// Document store and search index in one, upserting by id
#[derive(Default)]
pub struct MemoryStore {
    pub stored: Mutex<BTreeMap<String, Article>>,
    pub indexed: Mutex<BTreeMap<String, Article>>,
    /// Every save call's batch ids, including duplicates
    pub save_calls: Mutex<Vec<Vec<String>>>,
    pub save_failures: Mutex<u32>,
    pub index_failures: Mutex<u32>,
}

impl MemoryStore {
    pub fn stored_ids(&self) -> Vec<String> {
        self.stored.lock().unwrap().keys().cloned().collect()
    }

    pub fn indexed_ids(&self) -> Vec<String> {
        self.indexed.lock().unwrap().keys().cloned().collect()
    }

    pub fn seed(&self, articles: &[Article]) {
        let mut stored = self.stored.lock().unwrap();
        let mut indexed = self.indexed.lock().unwrap();
        for article in articles {
            stored.insert(article.id.clone(), article.clone());
            indexed.insert(article.id.clone(), article.clone());
        }
    }
}

#[async_trait]
impl StorageAdapter for MemoryStore {
    async fn save(&self, batch: &[Article], _collection: &str) -> Result<(), PipelineError> {
        if take_failure(&self.save_failures) {
            return Err(PipelineError::Transient("storage returned 503".to_string()));
        }
        self.save_calls
            .lock()
            .unwrap()
            .push(batch.iter().map(|a| a.id.clone()).collect());
        let mut stored = self.stored.lock().unwrap();
        for article in batch {
            stored.insert(article.id.clone(), article.clone());
        }
        Ok(())
    }

    async fn fetch(&self, ids: &[String], _collection: &str) -> Result<Vec<Article>, PipelineError> {
        let stored = self.stored.lock().unwrap();
        Ok(ids.iter().filter_map(|id| stored.get(id).cloned()).collect())
    }
}

#[async_trait]
impl SearchAdapter for MemoryStore {
    async fn index(&self, batch: &[Article], _collection: &str) -> Result<(), PipelineError> {
        if take_failure(&self.index_failures) {
            return Err(PipelineError::Transient("index returned 503".to_string()));
        }
        let mut indexed = self.indexed.lock().unwrap();
        for article in batch {
            indexed.insert(article.id.clone(), article.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        text: &str,
        _collection: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>, PipelineError> {
        let indexed = self.indexed.lock().unwrap();
        Ok(indexed
            .values()
            .filter(|a| a.body_text.contains(text))
            .filter(|a| start.map_or(true, |s| a.publication_timestamp >= s))
            .filter(|a| end.map_or(true, |e| a.publication_timestamp <= e))
            .map(|a| a.id.clone())
            .collect())
    }
}

/// Compute engine answering one topic per document, with scripted failures
#[derive(Default)]
pub struct ScriptedEngine {
    pub failures: Mutex<u32>,
    /// Corpus ids of every call, including failed ones
    pub calls: Mutex<Vec<Vec<String>>>,
    /// Time each call takes
    pub delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    /// Most calls ever running at once
    pub max_in_flight: AtomicUsize,
}

impl ScriptedEngine {
    pub fn set_failures(&self, times: u32) {
        *self.failures.lock().unwrap() = times;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ComputeEngine for ScriptedEngine {
    async fn extract_topics(
        &self,
        corpus: &[CorpusDocument],
        params: &ComputeParameters,
    ) -> Result<Vec<DocumentTopics>, PipelineError> {
        self.calls
            .lock()
            .unwrap()
            .push(corpus.iter().map(|d| d.id.clone()).collect());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if take_failure(&self.failures) {
            return Err(PipelineError::Transient("engine returned 500".to_string()));
        }
        Ok(corpus
            .iter()
            .map(|doc| DocumentTopics {
                id: doc.id.clone(),
                top_words: vec![vec![doc.label.clone(); params.num_top_words.min(2)]],
            })
            .collect())
    }
}

/// Requester receiving results and notifications
#[derive(Default)]
pub struct RecordingRequester {
    pub results: Mutex<Vec<TopicResult>>,
    pub notifications: Mutex<Vec<Notification>>,
    pub result_failures: Mutex<u32>,
    /// Time each result delivery takes
    pub delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    /// Most result deliveries ever running at once
    pub max_in_flight: AtomicUsize,
}

impl RecordingRequester {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn result_ids(&self) -> Vec<String> {
        self.results.lock().unwrap().iter().map(|r| r.id.clone()).collect()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.status.clone())
            .collect()
    }
}

#[async_trait]
impl ResultSink for RecordingRequester {
    async fn deliver_results(
        &self,
        _key: &QueryKey,
        batch: &[TopicResult],
    ) -> Result<(), PipelineError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if take_failure(&self.result_failures) {
            return Err(PipelineError::Transient("requester returned 502".to_string()));
        }
        self.results.lock().unwrap().extend(batch.iter().cloned());
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for RecordingRequester {
    async fn notify(&self, notification: &Notification) -> Result<(), PipelineError> {
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1), Duration::from_secs(2))
}

/// Defaults with millisecond retries
pub fn test_config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.retry.max_attempts = 2;
    config.retry.base_delay_ms = 1;
    config.retry.call_timeout_ms = 2_000;
    config.accumulator.threshold = 2;
    config.accumulator.seed = Some(42);
    config
}

/// All fakes for one test
pub struct Fakes {
    pub source: Arc<FakeSource>,
    pub store: Arc<MemoryStore>,
    pub engine: Arc<ScriptedEngine>,
    pub requester: Arc<RecordingRequester>,
}

impl Fakes {
    pub fn new(source: FakeSource) -> Self {
        Self {
            source: Arc::new(source),
            store: Arc::new(MemoryStore::default()),
            engine: Arc::new(ScriptedEngine::default()),
            requester: Arc::new(RecordingRequester::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            source: self.source.clone(),
            storage: self.store.clone(),
            search: self.store.clone(),
            engine: self.engine.clone(),
            results: self.requester.clone(),
            notifier: self.requester.clone(),
        }
    }

    pub fn result_dispatcher(&self, events: &EventBus) -> Arc<ResultDispatcher> {
        Arc::new(ResultDispatcher::new(
            BatchDispatcher::new(fast_retry()),
            self.requester.clone(),
            self.requester.clone(),
            10,
            events.clone(),
        ))
    }

    pub fn accumulator(&self, threshold: usize, events: &EventBus) -> Arc<Accumulator> {
        let compute = ComputeTrigger::new(
            self.engine.clone(),
            fast_retry(),
            ComputeParameters {
                num_topics: 2,
                num_top_words: 2,
                seed: Some(42),
            },
        );
        Arc::new(Accumulator::new(
            threshold,
            compute,
            self.result_dispatcher(events),
            events.clone(),
        ))
    }

    /// Poller wiring with a short sleep between cycles
    pub fn poller_deps(&self, accumulator: Arc<Accumulator>, events: &EventBus, interval: Duration) -> PollerDeps {
        let destinations: Vec<Arc<dyn Destination<Article>>> = vec![
            Arc::new(StorageDestination::new(self.store.clone(), "articles")),
            Arc::new(IndexDestination::new(self.store.clone(), "articles")),
        ];
        PollerDeps {
            source: self.source.clone(),
            destinations,
            stream: accumulator,
            notifier: self.requester.clone(),
            dispatcher: BatchDispatcher::new(fast_retry()).with_events(events.clone()),
            settings: PollerSettings {
                poll_interval: interval,
                batch_size: 2,
                completion_drain_attempts: 2,
            },
            events: events.clone(),
        }
    }
}
