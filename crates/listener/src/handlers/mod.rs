//! Handlers shipped with the SDK

mod persisting;
mod system;
mod task_result;

pub use persisting::PersistingHandler;
pub use system::SystemHandler;
pub use task_result::TaskResultHandler;
