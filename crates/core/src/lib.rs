//! Core domain types, errors, and constants for the `ricloud` SDK.
//!
//! ## Key Components
//!
//! - **`errors`**: the primary `Error` enum and `Result` alias, plus the
//!   focused `StreamError` and `IntegrityError` types raised while
//!   delivering results.
//! - **`types`**: frame headers, stream endpoints and the retrieval protocol.
//! - **`constants`**: message type names, limits and defaults shared by the
//!   delivery crates.

pub mod constants;
pub mod errors;
pub mod types;

pub use self::{
    constants::*,
    errors::{Error, IntegrityError, Result, StreamError},
    types::*,
};
