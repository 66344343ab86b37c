use async_trait::async_trait;
use ricloud_core::{
    FrameHeader, StreamError, DOWNLOAD_FILE_MESSAGE_TYPE, FETCH_DATA_MESSAGE_TYPE,
    MESSAGE_MESSAGE_TYPE, SYSTEM_MESSAGE_TYPE,
};
use ricloud_sink::records::{data_record, file_record, system_record};
use ricloud_sink::{save_payload, RecordStore, RetryingStore};
use ricloud_wire::Payload;
use std::path::PathBuf;
use std::sync::Arc;

use crate::handler::{Handler, HandlerError};

/// Writes every message to a relational store, and downloaded files to
/// the output directory.
///
/// | type            | table     |
/// |-----------------|-----------|
/// | `system`        | `system`  |
/// | `fetch-data`    | `feed`    |
/// | `message`       | `message` |
/// | `download-file` | `file`    |
pub struct PersistingHandler {
    output_dir: PathBuf,
    store: RetryingStore<Arc<dyn RecordStore>>,
}

impl PersistingHandler {
    pub fn new(output_dir: impl Into<PathBuf>, store: Arc<dyn RecordStore>, max_retries: u32) -> Self {
        Self {
            output_dir: output_dir.into(),
            store: RetryingStore::new(store, max_retries),
        }
    }
}

#[async_trait]
impl Handler for PersistingHandler {
    async fn handle(&self, header: &FrameHeader, mut payload: Payload) -> Result<(), HandlerError> {
        match header.message_type.as_str() {
            SYSTEM_MESSAGE_TYPE => {
                let body = payload.into_bytes()?;
                self.store.execute(&system_record(header, &body)?).await?;
                if body.windows(5).any(|w| w == b"error") {
                    return Err(StreamError::new(String::from_utf8_lossy(&body).into_owned()).into());
                }
            }
            FETCH_DATA_MESSAGE_TYPE => {
                let body = payload.into_bytes()?;
                self.store.execute(&data_record("feed", header, &body)?).await?;
            }
            MESSAGE_MESSAGE_TYPE => {
                let body = payload.into_bytes()?;
                self.store.execute(&data_record("message", header, &body)?).await?;
            }
            DOWNLOAD_FILE_MESSAGE_TYPE => {
                let path = save_payload(&self.output_dir, header, &mut payload)?;
                self.store.execute(&file_record(header, &path)?).await?;
            }
            other => {
                return Err(StreamError::new(format!("Unrecognised header type {other}")).into());
            }
        }
        Ok(())
    }
}
