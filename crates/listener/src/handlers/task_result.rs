use async_trait::async_trait;
use ricloud_core::{FrameHeader, SYSTEM_MESSAGE_TYPE};
use ricloud_task::{Resolution, TaskRegistry};
use ricloud_wire::Payload;
use std::sync::Arc;

use super::SystemHandler;
use crate::handler::{Handler, HandlerError, ResultAck, ResultCallback};

/// Catch-all handler that feeds results back to waiting tasks.
///
/// `system` messages are checked like [`SystemHandler`] does. Every other
/// message resolves its `task_id` in the registry, or goes to the injected
/// callback when one is set, and is then acknowledged upstream.
pub struct TaskResultHandler {
    registry: Arc<TaskRegistry>,
    ack: Option<Arc<dyn ResultAck>>,
    callback: Option<ResultCallback>,
}

impl TaskResultHandler {
    #[must_use]
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self {
            registry,
            ack: None,
            callback: None,
        }
    }

    #[must_use]
    pub fn with_ack(mut self, ack: Arc<dyn ResultAck>) -> Self {
        self.ack = Some(ack);
        self
    }

    #[must_use]
    pub fn with_callback(mut self, callback: ResultCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    async fn acknowledge(&self, task_id: &str) {
        let Some(ack) = &self.ack else {
            return;
        };
        if let Err(err) = ack.result_consumed(task_id).await {
            tracing::warn!(task_id = %task_id, error = %err, "unable to acknowledge result");
        }
    }
}

#[async_trait]
impl Handler for TaskResultHandler {
    async fn handle(&self, header: &FrameHeader, payload: Payload) -> Result<(), HandlerError> {
        let body = payload.into_bytes()?;
        if header.message_type == SYSTEM_MESSAGE_TYPE {
            SystemHandler::check(header, &body)?;
            return Ok(());
        }

        let task_id = header.require_task_id()?;
        if let Some(callback) = &self.callback {
            callback(task_id, body);
            self.acknowledge(task_id).await;
            return Ok(());
        }

        if self.registry.resolve(task_id, body) == Resolution::Resolved {
            self.acknowledge(task_id).await;
        }
        Ok(())
    }
}
