//! Result delivery for the ricloud API
//!
//! A [`Session`] submits tasks through a [`TaskApi`] and receives their
//! results on a background thread, either over the push stream
//! ([`StreamClient`]) or, for object-store accounts, by polling
//! ([`ObjectStorePoller`]).
//!
//! ```no_run
//! use ricloud_client::{Session, TaskRequest};
//! use ricloud_config::Settings;
//! use std::time::Duration;
//!
//! # fn main() -> ricloud_core::Result<()> {
//! let mut session = Session::connect(Settings::from_env()?)?;
//! let task = session.submit(&TaskRequest::new("icloud", "fetch-data", "1"), None)?;
//! let result = session.wait_for_result(&task, Some(Duration::from_secs(300)))?;
//! println!("{} bytes", result.len());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod object_store;
pub mod session;
pub mod stream;

pub use api::{AccountInfo, HttpTaskApi, TaskApi, TaskRequest};
pub use object_store::{check_status_integrity, ObjectStorePoller, TaskStatus, TickReport};
pub use session::{ListenerContext, ListenerFactory, Session};
pub use stream::{backoff_delay, StreamClient, TransportError};
