//! Constants used throughout the ricloud codebase

// Message types carried in frame headers
pub const SYSTEM_MESSAGE_TYPE: &str = "system";
pub const FETCH_DATA_MESSAGE_TYPE: &str = "fetch-data";
pub const MESSAGE_MESSAGE_TYPE: &str = "message";
pub const DOWNLOAD_FILE_MESSAGE_TYPE: &str = "download-file";

// Handler key matching every message type without an exact handler
pub const CATCH_ALL_HANDLER: &str = "__ALL__";

// Retrieval protocol value announced for object-store accounts
pub const OBJECT_STORE_PROTOCOL: &str = "asstore";

// Environment variable prefix for settings overrides
pub const RICLOUD_ENV_PREFIX: &str = "RICLOUD_";

// Stream reconnect backoff ceiling
pub const MAX_RECONNECT_DELAY_SECS: u64 = 60;

// Object store polling
pub const MAX_PENDING_BATCH: usize = 10_000;

// File sink limits
pub const MAX_FILE_ID_LEN: usize = 4096;
pub const MAX_FILE_PATH_LEN: usize = 250;
pub const MAX_SYSTEM_FIELD_LEN: usize = 200;

// Placeholder path segment for missing account/device ids
pub const MISSING_ID_SEGMENT: &str = "None";
