use ricloud_core::{FrameHeader, Identifier};
use ricloud_sink::records::file_record;
use ricloud_sink::{file_id_to_file_name, save_payload, MemoryStore, RetryingStore, SqlValue};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_download_is_saved_and_recorded_across_reconnect() {
    let output = TempDir::new().unwrap();
    let mut header = FrameHeader::new("download-file").with_task_id("T9");
    header.service = Some("icloud".into());
    header.account_id = Some(Identifier::Number(1));
    header.device_id = Some(Identifier::Text("dev".into()));
    header.file_id = Some("photos/IMG_0001.JPG".into());

    let path = save_payload(output.path(), &header, &mut Cursor::new(b"jpeg bytes".to_vec())).unwrap();

    assert_eq!(
        path,
        output
            .path()
            .join("icloud/1/dev")
            .join(file_id_to_file_name("photos/IMG_0001.JPG"))
    );
    assert_eq!(std::fs::read(&path).unwrap(), b"jpeg bytes");

    let store = Arc::new(MemoryStore::new());
    store.fail_next(1);
    let retrying = RetryingStore::new(Arc::clone(&store), 1);
    retrying.execute(&file_record(&header, &path).unwrap()).await.unwrap();

    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].value("file_id"),
        Some(&SqlValue::Text("photos/IMG_0001.JPG".into()))
    );
    assert_eq!(store.reconnects(), 1);
}
