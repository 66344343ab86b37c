//! Wire format of the ricloud push stream
//!
//! The stream body is line oriented. A blank line is a heartbeat. A line
//! holding only digits `N` announces a header of `N` bytes (JSON), which is
//! followed by a line holding the body length `M`, then `M - 2` bytes of
//! body and a two byte `\r\n` end marker:
//!
//! ```text
//! 36\r\n{"type":"fetch-data","task_id":"T1"}12\r\n{"sms":[]}\r\n
//! ```
//!
//! Large bodies are split into chunks that share a `task_id`; [`ChunkBuffers`]
//! reassembles them into temporary files.

pub mod chunks;
pub mod decoder;
pub mod encoder;

pub use chunks::{Assembly, ChunkBuffers, Payload};
pub use decoder::{DecodeError, Frame, FrameDecoder};
pub use encoder::{encode_frame, encode_heartbeat, END_MARKER};
