//! Atomic file writes so a crash never leaves a half-written result file

use ricloud_core::{Error, Result};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Copy a reader into `path` atomically.
///
/// The content is streamed into a temporary file next to the target and
/// renamed over it, replacing any existing file. Parent directories are
/// created as needed. Returns the number of bytes written.
pub fn write_atomic_from_reader<R: Read + ?Sized>(path: &Path, reader: &mut R) -> Result<u64> {
    let parent = path.parent().ok_or_else(|| {
        Error::configuration(format!("Invalid file path '{}': no parent directory", path.display()))
    })?;

    fs::create_dir_all(parent)
        .map_err(|e| Error::file_system(parent.to_path_buf(), "create parent directory", e))?;

    let mut temp = NamedTempFile::new_in(parent)
        .map_err(|e| Error::file_system(parent.to_path_buf(), "create temporary file", e))?;

    let written = io::copy(reader, temp.as_file_mut())
        .map_err(|e| Error::file_system(temp.path().to_path_buf(), "write to temporary file", e))?;

    temp.as_file_mut()
        .flush()
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| Error::file_system(temp.path().to_path_buf(), "sync temporary file", e))?;

    // Dropping `temp` on error removes the temporary file
    temp.persist(path)
        .map_err(|e| Error::file_system(path.to_path_buf(), "atomic rename", e.error))?;

    Ok(written)
}

/// Write a byte slice to `path` atomically
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    write_atomic_from_reader(path, &mut io::Cursor::new(content)).map(|_| ())
}
