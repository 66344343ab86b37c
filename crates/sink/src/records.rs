//! Rows written by the persisting handler

use ricloud_core::{FrameHeader, Identifier, StreamError, MAX_SYSTEM_FIELD_LEN};
use serde_json::Value;
use std::path::Path;

use crate::store::{InsertStatement, SqlValue};

impl From<Option<&Identifier>> for SqlValue {
    fn from(id: Option<&Identifier>) -> Self {
        match id {
            Some(Identifier::Number(n)) => SqlValue::Integer(*n),
            Some(Identifier::Text(s)) => SqlValue::Text(s.clone()),
            None => SqlValue::Null,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Render a JSON value as column text; strings are stored without quotes
fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `system` table row. `message` and `code` are cut to 200 characters.
pub fn system_record(header: &FrameHeader, body: &[u8]) -> Result<InsertStatement, StreamError> {
    let json: Value = serde_json::from_slice(body)
        .map_err(|e| StreamError::new(format!("Invalid system message body: {e}")))?;
    let field = |name: &str| {
        json.get(name)
            .map(|v| truncate(&field_text(v), MAX_SYSTEM_FIELD_LEN))
    };

    Ok(InsertStatement::new("system")
        .column("received", SqlValue::Now)
        .column("headers", header.to_json())
        .column("body", String::from_utf8_lossy(body).into_owned())
        .column("message", field("message"))
        .column("code", field("code")))
}

/// `feed` (for `fetch-data`) or `message` table row
pub fn data_record(
    table: &str,
    header: &FrameHeader,
    body: &[u8],
) -> Result<InsertStatement, StreamError> {
    Ok(device_columns(InsertStatement::new(table), header)?
        .column("headers", header.to_json())
        .column("body", String::from_utf8_lossy(body).into_owned()))
}

/// `file` table row pointing at a saved download
pub fn file_record(header: &FrameHeader, location: &Path) -> Result<InsertStatement, StreamError> {
    let file_id = header
        .file_id
        .clone()
        .ok_or_else(|| StreamError::new("Invalid download file request, no file_id"))?;

    Ok(device_columns(InsertStatement::new("file"), header)?
        .column("headers", header.to_json())
        .column("location", location.display().to_string())
        .column("file_id", file_id))
}

fn device_columns(
    statement: InsertStatement,
    header: &FrameHeader,
) -> Result<InsertStatement, StreamError> {
    let service = header.service.clone().ok_or_else(|| {
        StreamError::new(format!(
            "Message of type '{}' carries no service",
            header.message_type
        ))
    })?;

    Ok(statement
        .column("service", service)
        .column("received", SqlValue::Now)
        .column("account_id", header.account_id.as_ref())
        .column("device_id", header.device_id.as_ref())
        .column("device_tag", header.device_tag.clone()))
}
