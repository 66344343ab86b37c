//! Pending task tracking for ricloud
//!
//! A [`Task`] is created when work is submitted to the remote API and is
//! resolved exactly once when its result arrives, either over the push
//! stream or through the object-store poller. The [`TaskRegistry`] is the
//! only channel between the delivery thread and callers waiting on results.

pub mod registry;
pub mod task;

pub use registry::*;
pub use task::*;
