use async_trait::async_trait;
use bytes::Bytes;
use ricloud_core::{FrameHeader, StreamError};
use ricloud_wire::Payload;

use crate::handler::{Handler, HandlerError};

/// Logs `system` messages; a body mentioning `error` is a stream error
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHandler;

impl SystemHandler {
    pub(crate) fn check(header: &FrameHeader, body: &Bytes) -> Result<(), StreamError> {
        let text = String::from_utf8_lossy(body);
        tracing::info!(header = %header.to_json(), body = %text, "system message");
        if text.contains("error") {
            return Err(StreamError::new(text.into_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for SystemHandler {
    async fn handle(&self, header: &FrameHeader, payload: Payload) -> Result<(), HandlerError> {
        let body = payload.into_bytes()?;
        Self::check(header, &body)?;
        Ok(())
    }
}
