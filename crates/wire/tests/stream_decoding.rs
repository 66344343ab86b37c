use bytes::Bytes;
use ricloud_core::FrameHeader;
use ricloud_wire::{encode_frame, encode_heartbeat, Assembly, ChunkBuffers, Frame, FrameDecoder};
use std::io::Read;
use std::time::Duration;

fn chunked_frames(task_id: &str, body: &[u8], chunk_size: usize) -> Vec<Bytes> {
    let pieces: Vec<&[u8]> = body.chunks(chunk_size).collect();
    let total = pieces.len();
    pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| {
            let header = serde_json::json!({
                "type": "download-file",
                "task_id": task_id,
                "chunk": i + 1,
                "total_chunks": total,
                "chunk_size": chunk_size,
                "service": "icloud",
                "file_id": "abc",
            });
            encode_frame(header.to_string().as_bytes(), piece)
        })
        .collect()
}

/// Decode the whole stream, feeding it in 7 byte reads, and collect every
/// completed body alongside its header
fn drain(wire: &[u8]) -> Vec<(FrameHeader, Vec<u8>)> {
    let mut decoder = FrameDecoder::new();
    let mut buffers = ChunkBuffers::new(Duration::from_secs(60));
    let mut completed = Vec::new();

    for read in wire.chunks(7) {
        decoder.push(read);
        while let Some(frame) = decoder.next_frame().unwrap() {
            let Frame::Message { header, body } = frame else {
                continue;
            };
            let header = FrameHeader::parse(&header).unwrap();
            if let Assembly::Complete(mut payload) = buffers.accept(&header, body).unwrap() {
                let mut content = Vec::new();
                payload.read_to_end(&mut content).unwrap();
                completed.push((header, content));
            }
        }
    }
    decoder.finish().unwrap();
    assert!(buffers.is_empty());
    completed
}

#[test]
fn test_interleaved_chunked_messages_reassemble() {
    let first: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let second = b"a much shorter file body".to_vec();

    let mut a = chunked_frames("T1", &first, 128);
    let mut b = chunked_frames("T2", &second, 10);
    // Deliver the last chunk of each message first
    a.rotate_right(1);
    b.rotate_right(1);

    let mut wire = Vec::new();
    for i in 0..a.len().max(b.len()) {
        if let Some(frame) = a.get(i) {
            wire.extend_from_slice(frame);
        }
        wire.extend_from_slice(&encode_heartbeat());
        if let Some(frame) = b.get(i) {
            wire.extend_from_slice(frame);
        }
    }

    let completed = drain(&wire);

    assert_eq!(completed.len(), 2);
    let bodies: Vec<(&str, &[u8])> = completed
        .iter()
        .map(|(header, body)| (header.task_id.as_deref().unwrap(), body.as_slice()))
        .collect();
    assert!(bodies.contains(&("T1", first.as_slice())));
    assert!(bodies.contains(&("T2", second.as_slice())));
}

#[test]
fn test_fetch_data_message_passes_straight_through() {
    let wire = encode_frame(
        br#"{"type":"fetch-data","task_id":"T1"}"#,
        br#"{"sms":[]}"#,
    );

    let completed = drain(&wire);

    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].0.message_type, "fetch-data");
    assert_eq!(completed[0].1, br#"{"sms":[]}"#);
}
