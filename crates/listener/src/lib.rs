//! Routing of decoded stream messages to handlers
//!
//! The [`Dispatcher`] parses each frame header, reassembles chunked bodies
//! and hands complete payloads to the handler registered for the message
//! type (or the `__ALL__` catch-all). Failures of a single message are
//! logged and never stop the stream, with one exception: a sink that has
//! exhausted its retries returns [`HandlerError::Fatal`].

pub mod dispatcher;
pub mod handler;
pub mod handlers;

pub use dispatcher::{Dispatch, Dispatcher};
pub use handler::{Handler, HandlerError, ResultAck, ResultCallback};
pub use handlers::{PersistingHandler, SystemHandler, TaskResultHandler};
