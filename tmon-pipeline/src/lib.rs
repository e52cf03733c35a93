//! tmon-pipeline library interface
//!
//! Source polling, batched delivery, per-query accumulation, topic
//! extraction and result delivery, plus the HTTP surface over them.
//! Exposed as a library so integration tests can wire in-memory
//! collaborators.

pub mod accumulator;
pub mod analysis;
pub mod api;
pub mod cli;
pub mod collaborators;
pub mod compute;
pub mod delivery;
pub mod error;
pub mod poller;
pub mod registry;
pub mod results;

pub use crate::error::{ApiError, ApiResult, PipelineError};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tmon_common::config::TomlConfig;
use tmon_common::events::EventBus;
use tower_http::trace::TraceLayer;

use crate::accumulator::{Accumulator, ArticleStream};
use crate::analysis::Analysis;
use crate::collaborators::{
    ComputeEngine, HttpComputeEngine, HttpRequesterSink, HttpSearchAdapter, HttpSourceApi,
    HttpStorageAdapter, IndexDestination, NotificationSink, ResultSink, SearchAdapter, SourceApi,
    StorageAdapter, StorageDestination,
};
use crate::compute::ComputeTrigger;
use crate::delivery::{BatchDispatcher, Destination, RetryPolicy};
use crate::poller::{PollerDeps, PollerSettings};
use crate::registry::MonitorRegistry;
use crate::results::ResultDispatcher;

/// External services the pipeline talks to
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn SourceApi>,
    pub storage: Arc<dyn StorageAdapter>,
    pub search: Arc<dyn SearchAdapter>,
    pub engine: Arc<dyn ComputeEngine>,
    pub results: Arc<dyn ResultSink>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl Collaborators {
    /// HTTP clients for every endpoint in `config`
    pub fn http(config: &TomlConfig) -> Result<Self, PipelineError> {
        let endpoints = &config.endpoints;
        let timeout = config.retry.call_timeout();
        let requester = Arc::new(HttpRequesterSink::new(&endpoints.requester_url, timeout)?);

        Ok(Self {
            source: Arc::new(HttpSourceApi::new(
                &endpoints.source_url,
                endpoints.source_api_key.clone(),
                config.poller.requests_per_second,
                timeout,
            )?),
            storage: Arc::new(HttpStorageAdapter::new(&endpoints.storage_url, timeout)?),
            search: Arc::new(HttpSearchAdapter::new(&endpoints.search_url, timeout)?),
            engine: Arc::new(HttpComputeEngine::new(&endpoints.compute_url, timeout)?),
            results: requester.clone(),
            notifier: requester,
        })
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: MonitorRegistry,
    pub accumulator: Arc<Accumulator>,
    pub analysis: Arc<Analysis>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire the pipeline components over `collaborators`
    pub fn new(config: &TomlConfig, collaborators: Collaborators, event_bus: EventBus) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        let dispatcher = BatchDispatcher::new(retry.clone()).with_events(event_bus.clone());
        let collection = config.endpoints.articles_collection.clone();

        let compute = ComputeTrigger::new(
            collaborators.engine.clone(),
            retry.clone(),
            ComputeTrigger::parameters_from_config(&config.accumulator),
        );
        let results = Arc::new(ResultDispatcher::new(
            dispatcher.clone(),
            collaborators.results.clone(),
            collaborators.notifier.clone(),
            config.accumulator.result_batch_size,
            event_bus.clone(),
        ));
        let accumulator = Arc::new(Accumulator::new(
            config.accumulator.threshold,
            compute.clone(),
            results.clone(),
            event_bus.clone(),
        ));
        let analysis = Arc::new(Analysis::new(
            collaborators.search.clone(),
            collaborators.storage.clone(),
            compute,
            results,
            retry,
            collection.clone(),
        ));

        let destinations: Vec<Arc<dyn Destination<tmon_common::Article>>> = vec![
            Arc::new(StorageDestination::new(collaborators.storage.clone(), collection.clone())),
            Arc::new(IndexDestination::new(collaborators.search.clone(), collection)),
        ];
        let stream: Arc<dyn ArticleStream> = accumulator.clone();
        let registry = MonitorRegistry::new(PollerDeps {
            source: collaborators.source,
            destinations,
            stream,
            notifier: collaborators.notifier,
            dispatcher,
            settings: PollerSettings::from_config(&config.poller),
            events: event_bus.clone(),
        });

        Self {
            registry,
            accumulator,
            analysis,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::monitor_routes())
        .merge(api::buffer_routes())
        .merge(api::analysis_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
