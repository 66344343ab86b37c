use bytes::{BufMut, Bytes, BytesMut};

/// Terminates every frame body on the wire
pub const END_MARKER: &[u8] = b"\r\n";

/// Encode one header/body pair in the push stream format
#[must_use]
pub fn encode_frame(header: &[u8], body: &[u8]) -> Bytes {
    let header_len = header.len().to_string();
    let body_len = (body.len() + END_MARKER.len()).to_string();

    let mut out = BytesMut::with_capacity(
        header_len.len() + header.len() + body_len.len() + body.len() + 3 * END_MARKER.len(),
    );
    out.put_slice(header_len.as_bytes());
    out.put_slice(END_MARKER);
    out.put_slice(header);
    out.put_slice(body_len.as_bytes());
    out.put_slice(END_MARKER);
    out.put_slice(body);
    out.put_slice(END_MARKER);
    out.freeze()
}

/// Encode a heartbeat (an empty line)
#[must_use]
pub fn encode_heartbeat() -> Bytes {
    Bytes::from_static(END_MARKER)
}
