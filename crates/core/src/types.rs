use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{MISSING_ID_SEGMENT, OBJECT_STORE_PROTOCOL};
use crate::errors::StreamError;

/// Account or device identifier as it appears in frame headers.
///
/// The service sends these as JSON numbers for most services and as
/// strings for a few, so both shapes are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Number(i64),
    Text(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Number(n) => write!(f, "{n}"),
            Identifier::Text(s) => f.write_str(s),
        }
    }
}

/// Render an optional identifier as a path segment.
#[must_use]
pub fn id_segment(id: Option<&Identifier>) -> String {
    id.map_or_else(|| MISSING_ID_SEGMENT.to_string(), ToString::to_string)
}

/// JSON header of a frame.
///
/// Unknown fields are preserved in `extra` so the header can be written
/// back out unchanged by persisting sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FrameHeader {
    /// Header with only a message type, mostly useful in tests and encoders
    #[must_use]
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            task_id: None,
            chunk: None,
            total_chunks: None,
            chunk_size: None,
            service: None,
            account_id: None,
            device_id: None,
            device_tag: None,
            file_id: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Parse a header block off the wire
    pub fn parse(bytes: &[u8]) -> Result<Self, StreamError> {
        serde_json::from_slice(bytes)
            .map_err(|e| StreamError::new(format!("Invalid message header: {e}")))
    }

    /// Whether the body arrives in more than one chunk
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.total_chunks.unwrap_or(1) > 1
    }

    /// The task id, or a stream error naming the missing field
    pub fn require_task_id(&self) -> Result<&str, StreamError> {
        self.task_id.as_deref().ok_or_else(|| {
            StreamError::new(format!(
                "Message of type '{}' carries no task_id",
                self.message_type
            ))
        })
    }

    /// The header as compact JSON text
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Stream endpoint as announced by the account information call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndpoint {
    pub protocol: String,
    pub host: String,
    pub uri: String,
}

impl StreamEndpoint {
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.protocol, self.host, self.uri)
    }
}

/// How results reach the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetrievalProtocol {
    /// Results are pushed over the long-lived stream
    #[default]
    Push,
    /// Results are parked in an object store and fetched after polling
    ObjectStore,
}

impl RetrievalProtocol {
    /// Map the account's announced protocol name
    #[must_use]
    pub fn from_announced(name: Option<&str>) -> Self {
        match name {
            Some(OBJECT_STORE_PROTOCOL) => RetrievalProtocol::ObjectStore,
            _ => RetrievalProtocol::Push,
        }
    }
}
