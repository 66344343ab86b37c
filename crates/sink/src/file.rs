//! File sink for `download-file` results

use ricloud_core::{
    id_segment, FrameHeader, StreamError, MAX_FILE_ID_LEN, MAX_FILE_PATH_LEN,
};
use sha1::{Digest, Sha1};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::SinkError;

/// Map a file id onto a safe file name.
///
/// Ids that already look like a SHA-1 (40 lowercase hex characters) are
/// used as is. Anything else is hashed and prefixed with `re_` so it can
/// never collide with a real id.
#[must_use]
pub fn file_id_to_file_name(file_id: &str) -> String {
    let is_sha1 = file_id.len() == 40
        && file_id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if is_sha1 {
        return file_id.to_string();
    }
    format!("re_{}", hex::encode(Sha1::digest(file_id.as_bytes())))
}

/// Where a downloaded file lands:
/// `output_dir/service/account_id/device_id/file_name`
pub fn file_path(output_dir: &Path, header: &FrameHeader) -> Result<PathBuf, StreamError> {
    let file_id = header
        .file_id
        .as_deref()
        .ok_or_else(|| StreamError::new("Invalid download file request, no file_id"))?;
    if file_id.len() > MAX_FILE_ID_LEN {
        return Err(StreamError::new(
            "Invalid download file request, file_id is too long",
        ));
    }
    let service = header
        .service
        .as_deref()
        .ok_or_else(|| StreamError::new("Invalid download file request, no service"))?;

    let path = output_dir
        .join(service)
        .join(id_segment(header.account_id.as_ref()))
        .join(id_segment(header.device_id.as_ref()))
        .join(file_id_to_file_name(file_id));

    if path.as_os_str().len() > MAX_FILE_PATH_LEN {
        return Err(StreamError::new("File path too long, unable to save stream."));
    }
    Ok(path)
}

/// Stream a completed payload to its file, replacing any previous copy
pub fn save_payload<R: Read + ?Sized>(
    output_dir: &Path,
    header: &FrameHeader,
    payload: &mut R,
) -> Result<PathBuf, SinkError> {
    let path = file_path(output_dir, header)?;
    let written =
        ricloud_utils::write_atomic_from_reader(&path, payload).map_err(SinkError::File)?;
    tracing::debug!(path = %path.display(), bytes = written, "saved downloaded file");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ricloud_core::Identifier;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn download_header(file_id: &str) -> FrameHeader {
        let mut header = FrameHeader::new("download-file").with_task_id("T1");
        header.service = Some("icloud".into());
        header.account_id = Some(Identifier::Number(7));
        header.file_id = Some(file_id.into());
        header
    }

    #[test]
    fn test_sha1_file_ids_are_kept() {
        let id = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        assert_eq!(file_id_to_file_name(id), id);
    }

    #[test]
    fn test_other_file_ids_are_hashed() {
        // Uppercase hex is not accepted as is
        let upper = "DA39A3EE5E6B4B0D3255BFEF95601890AFD80709";
        let name = file_id_to_file_name(upper);
        assert!(name.starts_with("re_"));
        assert_eq!(name.len(), 43);

        assert_eq!(
            file_id_to_file_name(""),
            "re_da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn test_path_layout_uses_none_for_missing_ids() {
        let header = download_header("abc");
        let path = file_path(Path::new("out"), &header).unwrap();

        assert_eq!(
            path,
            Path::new("out/icloud/7/None").join(file_id_to_file_name("abc"))
        );
    }

    #[test]
    fn test_invalid_requests() {
        let mut header = download_header("abc");
        header.file_id = None;
        let err = file_path(Path::new("out"), &header).unwrap_err();
        assert_eq!(err.message, "Invalid download file request, no file_id");

        let header = download_header(&"x".repeat(MAX_FILE_ID_LEN + 1));
        let err = file_path(Path::new("out"), &header).unwrap_err();
        assert_eq!(err.message, "Invalid download file request, file_id is too long");

        let long_dir = "d".repeat(MAX_FILE_PATH_LEN);
        let err = file_path(Path::new(&long_dir), &download_header("abc")).unwrap_err();
        assert_eq!(err.message, "File path too long, unable to save stream.");
    }

    #[test]
    fn test_save_payload_replaces_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let header = download_header("abc");

        save_payload(temp_dir.path(), &header, &mut Cursor::new(b"first version".to_vec()))
            .unwrap();
        let path =
            save_payload(temp_dir.path(), &header, &mut Cursor::new(b"second".to_vec())).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    proptest! {
        #[test]
        fn prop_file_names_are_stable_and_distinct(a in ".{0,64}", b in ".{0,64}") {
            let name_a = file_id_to_file_name(&a);
            prop_assert_eq!(&name_a, &file_id_to_file_name(&a));
            if a != b {
                prop_assert_ne!(name_a, file_id_to_file_name(&b));
            }
        }

        #[test]
        fn prop_sha1_ids_map_to_themselves(id in "[0-9a-f]{40}") {
            prop_assert_eq!(file_id_to_file_name(&id), id);
        }
    }
}
