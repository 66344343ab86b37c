//! Runtime settings for the ricloud delivery SDK
//!
//! Settings start from built-in defaults and can be overridden per value
//! through `RICLOUD_<NAME>` environment variables. Configuration files are
//! read by the embedding application, not here.

pub mod settings;

pub use settings::*;
