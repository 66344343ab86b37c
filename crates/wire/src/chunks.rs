//! Reassembly of chunked message bodies
//!
//! Each in-progress message lives in an anonymous temporary file keyed by
//! its task id. Chunks are written at `chunk_size * (chunk - 1)` so they may
//! arrive in any order. Buffers are kept in insertion order, which makes
//! the idle sweep a walk from the front that stops at the first live entry.

use bytes::Bytes;
use indexmap::IndexMap;
use ricloud_core::{FrameHeader, StreamError};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::time::{Duration, Instant};

/// A complete message body, ready to be read by a handler.
///
/// Dropping a `File` payload closes (and deletes) its temporary file.
#[derive(Debug)]
pub enum Payload {
    Memory(Cursor<Bytes>),
    File(File),
}

impl Payload {
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Payload::Memory(Cursor::new(bytes.into()))
    }

    /// Read the remaining content into memory
    pub fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            Payload::Memory(cursor) => {
                let position = usize::try_from(cursor.position()).unwrap_or(usize::MAX);
                let bytes = cursor.into_inner();
                Ok(bytes.slice(position.min(bytes.len())..))
            }
            Payload::File(mut file) => {
                let mut content = Vec::new();
                file.read_to_end(&mut content)?;
                Ok(Bytes::from(content))
            }
        }
    }
}

impl Read for Payload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Payload::Memory(cursor) => cursor.read(buf),
            Payload::File(file) => file.read(buf),
        }
    }
}

/// Outcome of feeding one message to [`ChunkBuffers`]
#[derive(Debug)]
pub enum Assembly {
    Complete(Payload),
    Incomplete,
}

#[derive(Debug)]
struct ChunkBuffer {
    file: File,
    inserted_at: Instant,
    total_chunks: u64,
    received: BTreeSet<u64>,
}

/// In-progress multi-chunk messages, keyed by task id
#[derive(Debug)]
pub struct ChunkBuffers {
    buffers: IndexMap<String, ChunkBuffer>,
    idle_timeout: Duration,
}

impl ChunkBuffers {
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            buffers: IndexMap::new(),
            idle_timeout,
        }
    }

    /// Feed one decoded message.
    ///
    /// Unchunked messages complete immediately. Chunked messages complete
    /// once every chunk `1..=total_chunks` has been written.
    pub fn accept(&mut self, header: &FrameHeader, body: Bytes) -> Result<Assembly, StreamError> {
        self.accept_at(header, body, Instant::now())
    }

    pub(crate) fn accept_at(
        &mut self,
        header: &FrameHeader,
        body: Bytes,
        now: Instant,
    ) -> Result<Assembly, StreamError> {
        if !header.is_chunked() {
            return Ok(Assembly::Complete(Payload::from_bytes(body)));
        }

        let task_id = header.require_task_id()?;
        let total_chunks = header.total_chunks.unwrap_or(1);
        let chunk = header
            .chunk
            .filter(|c| (1..=total_chunks).contains(c))
            .ok_or_else(|| {
                StreamError::new(format!(
                    "Chunk index {:?} out of range 1..={total_chunks} for task '{task_id}'",
                    header.chunk
                ))
            })?;
        let chunk_size = header.chunk_size.ok_or_else(|| {
            StreamError::new(format!("Chunked message for task '{task_id}' has no chunk_size"))
        })?;

        if !self.buffers.contains_key(task_id) {
            let file = tempfile::tempfile().map_err(|e| {
                StreamError::new(format!("Unable to create chunk buffer for '{task_id}': {e}"))
            })?;
            tracing::debug!(task_id = %task_id, total_chunks, "opened chunk buffer");
            self.buffers.insert(
                task_id.to_string(),
                ChunkBuffer {
                    file,
                    inserted_at: now,
                    total_chunks,
                    received: BTreeSet::new(),
                },
            );
        }

        let written = self.write_chunk(task_id, chunk, chunk_size, total_chunks, &body);
        if let Err(err) = written {
            // The buffer can no longer complete correctly
            self.buffers.shift_remove(task_id);
            return Err(err);
        }

        let complete = self
            .buffers
            .get(task_id)
            .is_some_and(|buffer| buffer.received.len() as u64 == buffer.total_chunks);
        if !complete {
            return Ok(Assembly::Incomplete);
        }

        let Some(mut buffer) = self.buffers.shift_remove(task_id) else {
            return Ok(Assembly::Incomplete);
        };
        buffer
            .file
            .seek(SeekFrom::Start(0))
            .map_err(|e| StreamError::new(format!("Unable to rewind chunk buffer: {e}")))?;
        tracing::debug!(task_id = %task_id, total_chunks, "chunked message complete");
        Ok(Assembly::Complete(Payload::File(buffer.file)))
    }

    fn write_chunk(
        &mut self,
        task_id: &str,
        chunk: u64,
        chunk_size: u64,
        total_chunks: u64,
        body: &[u8],
    ) -> Result<(), StreamError> {
        let Some(buffer) = self.buffers.get_mut(task_id) else {
            return Ok(());
        };
        if buffer.total_chunks != total_chunks {
            return Err(StreamError::new(format!(
                "Task '{task_id}' changed total_chunks from {} to {total_chunks}",
                buffer.total_chunks
            )));
        }

        let offset = chunk_size
            .checked_mul(chunk - 1)
            .ok_or_else(|| StreamError::new(format!("Chunk offset overflow for '{task_id}'")))?;
        buffer
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| buffer.file.write_all(body))
            .map_err(|e| StreamError::new(format!("Unable to write chunk for '{task_id}': {e}")))?;
        buffer.received.insert(chunk);
        Ok(())
    }

    /// Drop buffers idle for longer than the timeout, oldest first
    pub fn sweep_expired(&mut self) -> Vec<String> {
        self.sweep_expired_at(Instant::now())
    }

    pub(crate) fn sweep_expired_at(&mut self, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        while let Some((task_id, buffer)) = self.buffers.first() {
            if now.saturating_duration_since(buffer.inserted_at) <= self.idle_timeout {
                break;
            }
            let task_id = task_id.clone();
            if let Some(buffer) = self.buffers.shift_remove(&task_id) {
                tracing::warn!(
                    task_id = %task_id,
                    received = buffer.received.len(),
                    total_chunks = buffer.total_chunks,
                    "dropping incomplete chunked message"
                );
            }
            expired.push(task_id);
        }
        expired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    #[must_use]
    pub fn contains(&self, task_id: &str) -> bool {
        self.buffers.contains_key(task_id)
    }
}
