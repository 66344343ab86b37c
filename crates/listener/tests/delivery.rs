use ricloud_core::CATCH_ALL_HANDLER;
use ricloud_listener::{Dispatch, Dispatcher, TaskResultHandler};
use ricloud_task::TaskRegistry;
use ricloud_wire::{encode_frame, encode_heartbeat, Frame, FrameDecoder};
use std::sync::Arc;
use std::time::Duration;

async fn deliver(dispatcher: &mut Dispatcher, wire: &[u8]) -> Vec<Dispatch> {
    let mut decoder = FrameDecoder::new();
    let mut outcomes = Vec::new();
    decoder.push(wire);
    while let Some(frame) = decoder.next_frame().unwrap() {
        match frame {
            Frame::Heartbeat => dispatcher.on_heartbeat(),
            Frame::Message { header, body } => {
                outcomes.push(dispatcher.on_message(&header, body).await.unwrap());
            }
        }
    }
    outcomes
}

#[tokio::test]
async fn test_result_reaches_waiting_thread() {
    let registry = Arc::new(TaskRegistry::default());
    let task = registry.create("T1").unwrap();
    let mut dispatcher = Dispatcher::new(Duration::from_secs(60)).with_handler(
        CATCH_ALL_HANDLER,
        Arc::new(TaskResultHandler::new(registry.clone())),
    );

    let waiter = std::thread::spawn(move || task.wait_for_result(Some(Duration::from_secs(5))));

    let mut wire = encode_heartbeat().to_vec();
    wire.extend_from_slice(&encode_frame(
        br#"{"type":"fetch-data","task_id":"T1"}"#,
        br#"{"sms":[]}"#,
    ));
    let outcomes = deliver(&mut dispatcher, &wire).await;

    assert_eq!(outcomes, vec![Dispatch::Handled]);
    assert_eq!(&waiter.join().unwrap().unwrap()[..], br#"{"sms":[]}"#);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_bad_message_between_good_ones() {
    let registry = Arc::new(TaskRegistry::default());
    registry.create("A").unwrap();
    registry.create("B").unwrap();
    let mut dispatcher = Dispatcher::new(Duration::from_secs(60)).with_handler(
        CATCH_ALL_HANDLER,
        Arc::new(TaskResultHandler::new(registry.clone())),
    );

    let mut wire = Vec::new();
    wire.extend_from_slice(&encode_frame(br#"{"type":"fetch-data","task_id":"A"}"#, b"1"));
    // No task id: a stream error for this message only
    wire.extend_from_slice(&encode_frame(br#"{"type":"fetch-data"}"#, b"2"));
    wire.extend_from_slice(&encode_frame(br#"{"type":"fetch-data","task_id":"B"}"#, b"3"));

    let outcomes = deliver(&mut dispatcher, &wire).await;

    assert_eq!(
        outcomes,
        vec![Dispatch::Handled, Dispatch::Dropped, Dispatch::Handled]
    );
    assert_eq!(&registry.wait("B", None).unwrap()[..], b"3");
}
