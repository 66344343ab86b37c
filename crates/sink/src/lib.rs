//! Sinks that persist delivered results
//!
//! - **`file`**: writes downloaded files below an output directory, under a
//!   name derived from the file id.
//! - **`store`**: the relational sink interface (`RecordStore`), the insert
//!   statements the persisting handler produces, and `RetryingStore`, which
//!   reconnects and retries a bounded number of times.
//! - **`records`**: builds the `system`, `feed`, `message` and `file` rows
//!   from frame headers and bodies.

pub mod file;
pub mod records;
pub mod store;

pub use file::{file_id_to_file_name, file_path, save_payload};
pub use store::{
    InsertStatement, MemoryStore, RecordStore, RetryingStore, SqlValue, StoreError,
    StoreErrorKind,
};

use ricloud_core::StreamError;

/// Failure of a sink operation
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The message itself is unusable; drop it and carry on
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Writing the output file failed
    #[error("unable to save file: {0}")]
    File(#[source] ricloud_core::Error),

    /// The store rejected the statement without a connection problem
    #[error(transparent)]
    Store(StoreError),

    /// Reconnecting did not help; delivery has to stop
    #[error("record store still failing after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

impl SinkError {
    /// Whether delivery must stop rather than skip this message
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::RetriesExhausted { .. })
    }
}
