//! Incremental decoder for the push stream framing
//!
//! Bytes are pushed in whatever pieces the transport delivers them and
//! complete frames are pulled back out, so a frame may straddle any number
//! of network reads.

use bytes::{Buf, Bytes, BytesMut};

use crate::encoder::END_MARKER;

/// Longest line accepted while looking for a newline
const MAX_LINE_LEN: usize = 4096;

/// One unit decoded from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Blank line, proves the connection is alive
    Heartbeat,
    /// Raw header (JSON text) and body bytes
    Message { header: Bytes, body: Bytes },
}

/// Framing violations. Any of these leaves the decoder out of step with the
/// sender, so the connection has to be re-established.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid body length line {0:?}")]
    InvalidLength(String),

    #[error("body length {0} is shorter than the end marker")]
    BodyTooShort(usize),

    #[error("line exceeds {MAX_LINE_LEN} bytes without a newline")]
    LineTooLong,

    #[error("stream closed mid-frame with {buffered} bytes buffered")]
    Truncated { buffered: usize },
}

#[derive(Debug)]
enum State {
    /// Expecting a heartbeat or a header length line
    Line,
    /// Expecting `len` header bytes
    Header { len: usize },
    /// Expecting the body length line
    BodyLength { header: Bytes },
    /// Expecting `len` bytes: body plus end marker
    Body { header: Bytes, len: usize },
}

/// Push-based frame decoder
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    state: State,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            state: State::Line,
        }
    }

    /// Append bytes received from the transport
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed by a frame
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next complete frame, `Ok(None)` if more bytes are needed
    pub fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        loop {
            match std::mem::replace(&mut self.state, State::Line) {
                State::Line => {
                    let Some(line) = self.take_line()? else {
                        return Ok(None);
                    };
                    let line = trim(&line);
                    if line.is_empty() {
                        return Ok(Some(Frame::Heartbeat));
                    }
                    if line.iter().all(u8::is_ascii_digit) {
                        let len = parse_len(line)?;
                        self.state = State::Header { len };
                    } else {
                        tracing::debug!(
                            line = %String::from_utf8_lossy(line),
                            "ignoring unexpected line on stream"
                        );
                    }
                }
                State::Header { len } => {
                    if self.buf.len() < len {
                        self.state = State::Header { len };
                        return Ok(None);
                    }
                    let header = self.buf.split_to(len).freeze();
                    self.state = State::BodyLength { header };
                }
                State::BodyLength { header } => {
                    let Some(line) = self.take_line()? else {
                        self.state = State::BodyLength { header };
                        return Ok(None);
                    };
                    let len = parse_len(trim(&line))?;
                    if len < END_MARKER.len() {
                        return Err(DecodeError::BodyTooShort(len));
                    }
                    self.state = State::Body { header, len };
                }
                State::Body { header, len } => {
                    if self.buf.len() < len {
                        self.state = State::Body { header, len };
                        return Ok(None);
                    }
                    let mut body = self.buf.split_to(len);
                    body.truncate(len - END_MARKER.len());
                    return Ok(Some(Frame::Message {
                        header,
                        body: body.freeze(),
                    }));
                }
            }
        }
    }

    /// Called once the connection has closed.
    ///
    /// Fails with [`DecodeError::Truncated`] when a frame was cut off.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        let idle = matches!(self.state, State::Line) && trim(&self.buf).is_empty();
        let buffered = self.buf.len();
        self.buf.clear();
        self.state = State::Line;

        if idle {
            Ok(())
        } else {
            Err(DecodeError::Truncated { buffered })
        }
    }

    /// Split off the next `\n` terminated line, including the terminator
    fn take_line(&mut self) -> Result<Option<Bytes>, DecodeError> {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let line = self.buf.split_to(pos + 1).freeze();
                Ok(Some(line))
            }
            None if self.buf.len() > MAX_LINE_LEN => {
                self.buf.advance(self.buf.len());
                Err(DecodeError::LineTooLong)
            }
            None => Ok(None),
        }
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |pos| pos + 1);
    &bytes[start..end]
}

fn parse_len(line: &[u8]) -> Result<usize, DecodeError> {
    std::str::from_utf8(line)
        .ok()
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| DecodeError::InvalidLength(String::from_utf8_lossy(line).into_owned()))
}
