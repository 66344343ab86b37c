//! Shared utilities for the ricloud delivery crates
//!
//! - **`tracing`**: subscriber initialisation and the spans used by the
//!   stream client, dispatcher and poller.
//! - **`atomic_file`**: atomic, streaming file writes for result sinks.

pub mod atomic_file;
pub mod tracing;

pub use atomic_file::*;
