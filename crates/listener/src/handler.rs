use async_trait::async_trait;
use bytes::Bytes;
use ricloud_core::{FrameHeader, StreamError};
use ricloud_sink::SinkError;
use ricloud_wire::Payload;
use std::sync::Arc;

/// Consumer of complete messages of one type
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, header: &FrameHeader, payload: Payload) -> Result<(), HandlerError>;
}

/// Receives results instead of the task registry
pub type ResultCallback = Arc<dyn Fn(&str, Bytes) + Send + Sync>;

/// Tells the remote API a result has been consumed
#[async_trait]
pub trait ResultAck: Send + Sync {
    async fn result_consumed(&self, task_id: &str) -> ricloud_core::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The message is dropped, the stream continues
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// A sink failed on this message only
    #[error(transparent)]
    Sink(SinkError),

    /// Delivery cannot continue
    #[error("fatal sink failure: {0}")]
    Fatal(#[source] SinkError),
}

impl From<SinkError> for HandlerError {
    fn from(error: SinkError) -> Self {
        match error {
            SinkError::Stream(err) => HandlerError::Stream(err),
            err if err.is_fatal() => HandlerError::Fatal(err),
            err => HandlerError::Sink(err),
        }
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(error: std::io::Error) -> Self {
        HandlerError::Stream(StreamError::new(format!("Unable to read message body: {error}")))
    }
}

impl HandlerError {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, HandlerError::Fatal(_))
    }
}
