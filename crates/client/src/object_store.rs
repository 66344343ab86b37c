//! Polling-based retrieval for accounts whose results are parked in an
//! object store instead of being pushed over the stream

use bytes::Bytes;
use futures::future::join_all;
use ricloud_config::ObjectStoreSettings;
use ricloud_core::{Error, IntegrityError, Result};
use ricloud_task::{Resolution, TaskRegistry};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::Instrument;

use crate::api::TaskApi;

/// A status entry that passed the integrity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub status: String,
    /// Set once the result can be downloaded
    pub retrieval_endpoint: Option<String>,
}

/// Validate one entry of a status response.
///
/// The entry must carry both `status` and `result_retrieved`, and the
/// result must not have been retrieved already.
pub fn check_status_integrity(task_id: &str, entry: &Value) -> std::result::Result<TaskStatus, IntegrityError> {
    let invalid = || IntegrityError::InvalidTaskStatus {
        task_id: task_id.to_string(),
    };
    let status = entry.get("status").ok_or_else(invalid)?;
    let retrieved = entry
        .get("result_retrieved")
        .and_then(Value::as_bool)
        .ok_or_else(invalid)?;
    if retrieved {
        return Err(IntegrityError::ResultRetrieved {
            task_id: task_id.to_string(),
        });
    }

    Ok(TaskStatus {
        status: status.as_str().map_or_else(|| status.to_string(), str::to_string),
        retrieval_endpoint: entry
            .get("retrieval_endpoint")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// What a single poll achieved
#[derive(Debug, Default)]
pub struct TickReport {
    /// Pending tasks at the start of the tick
    pub pending: usize,
    /// Task ids asked about in the status request
    pub queried: usize,
    /// Task ids whose results were fetched and resolved
    pub resolved: Vec<String>,
    pub integrity_errors: Vec<IntegrityError>,
    /// Downloads that failed, retried on the next tick
    pub failed: Vec<(String, Error)>,
}

pub struct ObjectStorePoller {
    api: Arc<dyn TaskApi>,
    registry: Arc<TaskRegistry>,
    workers: Arc<Semaphore>,
    max_batch: usize,
    idle_interval: Duration,
    busy_interval: Duration,
}

impl ObjectStorePoller {
    pub fn new(api: Arc<dyn TaskApi>, registry: Arc<TaskRegistry>, settings: &ObjectStoreSettings) -> Self {
        Self {
            api,
            registry,
            workers: Arc::new(Semaphore::new(settings.workers.max(1))),
            max_batch: settings.max_batch.max(1),
            idle_interval: settings.idle_interval,
            busy_interval: settings.busy_interval,
        }
    }

    /// Poll until shutdown is signalled
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let pending = self.registry.pending_count();
            let span = ricloud_utils::tracing::poll_span(pending);
            let pause = match self.tick().instrument(span).await {
                Ok(report) if report.pending > 0 => self.busy_interval,
                Ok(_) => self.idle_interval,
                Err(err) => {
                    tracing::warn!(error = %err, "task status request failed");
                    self.busy_interval
                }
            };

            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    /// One poll: query status for pending tasks, fetch ready results
    /// through the worker pool, resolve and acknowledge them
    pub async fn tick(&self) -> Result<TickReport> {
        let pending = self.registry.pending_ids();
        let mut report = TickReport {
            pending: pending.len(),
            ..TickReport::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        let batch = &pending[..pending.len().min(self.max_batch)];
        report.queried = batch.len();
        let statuses = self.api.task_status(batch).await?;

        let mut ready = Vec::new();
        for task_id in batch {
            let Some(entry) = statuses.get(task_id) else {
                continue;
            };
            match check_status_integrity(task_id, entry) {
                Ok(TaskStatus {
                    retrieval_endpoint: Some(url),
                    ..
                }) => ready.push((task_id.clone(), url)),
                Ok(status) => {
                    tracing::debug!(task_id = %task_id, status = %status.status, "result not ready");
                }
                Err(err) => {
                    tracing::error!(task_id = %err.task_id(), error = %err, "task status integrity check failed");
                    self.registry.fail(task_id, err.clone());
                    report.integrity_errors.push(err);
                }
            }
        }

        let fetches = ready.into_iter().map(|(task_id, url)| async move {
            let result = self.fetch(&url).await;
            (task_id, result)
        });
        for (task_id, result) in join_all(fetches).await {
            match result {
                Ok(body) => {
                    if self.registry.resolve(&task_id, body) == Resolution::Resolved {
                        if let Err(err) = self.api.result_consumed(&task_id).await {
                            tracing::warn!(task_id = %task_id, error = %err, "unable to acknowledge result");
                        }
                        report.resolved.push(task_id);
                    }
                }
                Err(err) => {
                    tracing::warn!(task_id = %task_id, error = %err, "result download failed");
                    report.failed.push((task_id, err));
                }
            }
        }

        Ok(report)
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|e| Error::network(url, format!("worker pool closed: {e}")))?;
        self.api.fetch_result(url).await
    }
}
