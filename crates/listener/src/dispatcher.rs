use bytes::Bytes;
use futures::FutureExt;
use ricloud_core::{FrameHeader, CATCH_ALL_HANDLER};
use ricloud_wire::{Assembly, ChunkBuffers};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::handler::{Handler, HandlerError};

/// What became of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler processed the complete message
    Handled,
    /// A chunk was buffered, the message is not complete yet
    Buffered,
    /// The message was logged and dropped
    Dropped,
}

/// Routes messages to handlers by `type`
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn Handler>>,
    chunks: ChunkBuffers,
}

impl Dispatcher {
    #[must_use]
    pub fn new(chunk_idle_timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            chunks: ChunkBuffers::new(chunk_idle_timeout),
        }
    }

    /// Register a handler for a message type, or for [`CATCH_ALL_HANDLER`]
    #[must_use]
    pub fn with_handler(mut self, message_type: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.register(message_type, handler);
        self
    }

    pub fn register(&mut self, message_type: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(message_type.into(), handler);
    }

    pub fn on_heartbeat(&self) {
        tracing::debug!("heartbeat");
    }

    /// Process one decoded frame.
    ///
    /// Only [`HandlerError::Fatal`] is returned; every other failure is
    /// logged and reported as [`Dispatch::Dropped`].
    pub async fn on_message(&mut self, header: &[u8], body: Bytes) -> Result<Dispatch, HandlerError> {
        let header = match FrameHeader::parse(header) {
            Ok(header) => header,
            Err(err) => {
                tracing::error!(error = %err, "stream error");
                return Ok(Dispatch::Dropped);
            }
        };

        let Some(handler) = self
            .handlers
            .get(&header.message_type)
            .or_else(|| self.handlers.get(CATCH_ALL_HANDLER))
            .cloned()
        else {
            tracing::error!(
                message_type = %header.message_type,
                task_id = ?header.task_id,
                bytes = body.len(),
                "unknown message type"
            );
            return Ok(Dispatch::Dropped);
        };

        let payload = match self.chunks.accept(&header, body) {
            Ok(Assembly::Complete(payload)) => payload,
            Ok(Assembly::Incomplete) => return Ok(Dispatch::Buffered),
            Err(err) => {
                tracing::error!(task_id = ?header.task_id, error = %err, "stream error");
                return Ok(Dispatch::Dropped);
            }
        };

        let span = ricloud_utils::tracing::message_span(&header.message_type, header.task_id.as_deref());
        let outcome = AssertUnwindSafe(handler.handle(&header, payload))
            .catch_unwind()
            .instrument(span)
            .await;

        match outcome {
            Ok(Ok(())) => Ok(Dispatch::Handled),
            Ok(Err(HandlerError::Stream(err))) => {
                tracing::error!(task_id = ?header.task_id, error = %err, "stream error");
                Ok(Dispatch::Dropped)
            }
            Ok(Err(HandlerError::Fatal(err))) => {
                tracing::error!(
                    severity = "critical",
                    task_id = ?header.task_id,
                    error = %err,
                    "handler failed fatally, stopping delivery"
                );
                Err(HandlerError::Fatal(err))
            }
            Ok(Err(err)) => {
                tracing::error!(
                    severity = "critical",
                    task_id = ?header.task_id,
                    error = %err,
                    "handler failed"
                );
                Ok(Dispatch::Dropped)
            }
            Err(panic) => {
                tracing::error!(
                    severity = "critical",
                    message_type = %header.message_type,
                    task_id = ?header.task_id,
                    panic = %panic_message(panic.as_ref()),
                    "handler panicked"
                );
                Ok(Dispatch::Dropped)
            }
        }
    }

    /// Drop chunk buffers that have been idle too long
    pub fn sweep_idle_chunks(&mut self) -> usize {
        self.chunks.sweep_expired().len()
    }

    /// Chunked messages still being assembled
    #[must_use]
    pub fn pending_chunked(&self) -> usize {
        self.chunks.len()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
