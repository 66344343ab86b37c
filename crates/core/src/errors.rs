use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for ricloud operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ricloud operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Network-related errors
    #[error("network error for '{endpoint}': {message}")]
    Network { endpoint: String, message: String },

    /// The remote API answered, but rejected the request
    #[error("API error for '{endpoint}' (status {status}): {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// Operation timeout errors
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// A task with this id is already tracked
    #[error("task '{task_id}' is already registered")]
    DuplicateTask { task_id: String },

    /// The task id is neither pending nor recently resolved
    #[error("task '{task_id}' is not tracked")]
    UnknownTask { task_id: String },

    /// A task status entry failed its integrity check
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// A message could not be processed
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The delivery thread stopped on an unrecoverable failure
    #[error("result delivery stopped: {message}")]
    DeliveryStopped { message: String },

    /// File system operations
    #[error("file system {operation} operation failed for '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Domain-level failure while handling a single stream message.
///
/// These are logged by the dispatcher and the message is dropped; the
/// stream itself keeps running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StreamError {
    pub message: String,
}

impl StreamError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Problems with a task status entry returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    /// The entry lacks `status` or `result_retrieved`
    #[error("invalid status entry for task '{task_id}'")]
    InvalidTaskStatus { task_id: String },

    /// The result was already fetched by somebody else
    #[error("result for task '{task_id}' was already retrieved")]
    ResultRetrieved { task_id: String },
}

impl IntegrityError {
    #[must_use]
    pub fn task_id(&self) -> &str {
        match self {
            IntegrityError::InvalidTaskStatus { task_id }
            | IntegrityError::ResultRetrieved { task_id } => task_id,
        }
    }
}

// Conversion implementations
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::FileSystem {
            path: PathBuf::new(),
            operation: "unknown".to_string(),
            source: error,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Json {
            message: error.to_string(),
            source: error,
        }
    }
}

// Helper methods for creating errors with context
impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create a network error
    #[must_use]
    pub fn network(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Network {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create an API error
    #[must_use]
    pub fn api(endpoint: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Error::Api {
            endpoint: endpoint.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a duplicate task error
    #[must_use]
    pub fn duplicate_task(task_id: impl Into<String>) -> Self {
        Error::DuplicateTask {
            task_id: task_id.into(),
        }
    }

    /// Create an unknown task error
    #[must_use]
    pub fn unknown_task(task_id: impl Into<String>) -> Self {
        Error::UnknownTask {
            task_id: task_id.into(),
        }
    }

    /// Create a delivery stopped error
    #[must_use]
    pub fn delivery_stopped(message: impl Into<String>) -> Self {
        Error::DeliveryStopped {
            message: message.into(),
        }
    }

    /// Create a file system error with context
    #[must_use]
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Whether the error is a wait that ran out of time
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
