//! Process-wide map of active monitors
//!
//! One entry per [`QueryKey`] holding the poller's session id, its
//! cancellation token, its join handle and a shared view of its status.
//! A poller that finishes on its own removes its entry; an external stop
//! removes the entry first and then waits for the task.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tmon_common::events::PipelineEvent;
use tmon_common::QueryKey;

use crate::error::PipelineError;
use crate::poller::{MonitorStatus, MonitoringWindow, PollerDeps, SourcePoller};

struct MonitorHandle {
    session_id: Uuid,
    cancel: CancellationToken,
    status: Arc<RwLock<MonitorStatus>>,
    task: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct MonitorRegistry {
    monitors: Arc<RwLock<HashMap<QueryKey, MonitorHandle>>>,
    deps: PollerDeps,
}

impl MonitorRegistry {
    pub fn new(deps: PollerDeps) -> Self {
        Self {
            monitors: Arc::new(RwLock::new(HashMap::new())),
            deps,
        }
    }

    /// Spawn a poller for `key` over `[start, end]`
    ///
    /// Fails with `Conflict` if `key` is already monitored.
    pub async fn start(
        &self,
        key: QueryKey,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Uuid, PipelineError> {
        let window = MonitoringWindow::new(key.clone(), start, end)?;

        // Held until the entry is inserted so the task cannot remove it first
        let mut monitors = self.monitors.write().await;
        if monitors.contains_key(&key) {
            return Err(PipelineError::Conflict(format!("{} is already monitored", key)));
        }

        let session_id = Uuid::new_v4();
        let poller = SourcePoller::new(&self.deps, window, session_id);
        let status = poller.status_handle();
        let cancel = CancellationToken::new();

        let task = {
            let monitors = self.monitors.clone();
            let cancel = cancel.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let state = poller.run(cancel).await;

                let mut monitors = monitors.write().await;
                if monitors.get(&key).map(|h| h.session_id) == Some(session_id) {
                    monitors.remove(&key);
                }
                tracing::debug!(key = %key, session_id = %session_id, state = ?state, "Monitor task exited");
            })
        };

        monitors.insert(
            key.clone(),
            MonitorHandle {
                session_id,
                cancel,
                status,
                task: Some(task),
            },
        );
        drop(monitors);

        tracing::info!(key = %key, session_id = %session_id, "Monitoring request accepted");
        self.deps.events.emit_lossy(PipelineEvent::MonitorStarted {
            key,
            session_id,
            start,
            end,
            timestamp: Utc::now(),
        });

        Ok(session_id)
    }

    /// Stop the monitor for `key` and wait for its task to finish
    ///
    /// A poller asleep between cycles stops at once; one mid-cycle finishes
    /// the cycle first.
    pub async fn stop(&self, key: &QueryKey) -> Result<MonitorStatus, PipelineError> {
        let handle = self
            .monitors
            .write()
            .await
            .remove(key)
            .ok_or_else(|| PipelineError::NotFound(format!("{} is not monitored", key)))?;

        tracing::info!(key = %key, session_id = %handle.session_id, "Stopping monitor");
        handle.cancel.cancel();
        if let Some(task) = handle.task {
            if let Err(e) = task.await {
                tracing::error!(key = %key, error = %e, "Monitor task panicked");
            }
        }

        let status = handle.status.read().await.clone();
        Ok(status)
    }

    /// Snapshot of every active monitor
    pub async fn list(&self) -> Vec<MonitorStatus> {
        let handles: Vec<Arc<RwLock<MonitorStatus>>> = self
            .monitors
            .read()
            .await
            .values()
            .map(|h| h.status.clone())
            .collect();

        let mut statuses = Vec::with_capacity(handles.len());
        for status in handles {
            statuses.push(status.read().await.clone());
        }
        statuses.sort_by(|a, b| (&a.issue, &a.requester).cmp(&(&b.issue, &b.requester)));
        statuses
    }

    pub async fn status(&self, key: &QueryKey) -> Option<MonitorStatus> {
        let status = self.monitors.read().await.get(key).map(|h| h.status.clone())?;
        let snapshot = status.read().await.clone();
        Some(snapshot)
    }

    pub async fn is_active(&self, key: &QueryKey) -> bool {
        self.monitors.read().await.contains_key(key)
    }

    pub async fn active_count(&self) -> usize {
        self.monitors.read().await.len()
    }

    /// Cancel every monitor and wait for all of them
    pub async fn shutdown(&self) {
        let handles: Vec<(QueryKey, MonitorHandle)> = self.monitors.write().await.drain().collect();
        if handles.is_empty() {
            return;
        }

        tracing::info!(monitors = handles.len(), "Stopping all monitors");
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }
        for (key, handle) in handles {
            if let Some(task) = handle.task {
                if let Err(e) = task.await {
                    tracing::error!(key = %key, error = %e, "Monitor task panicked");
                }
            }
        }
    }
}
