//! Atomic file writes: temp file in the target directory, fsync, rename.
//!
//! A reader never sees a partially-written record, which is what makes
//! artifact presence a safe resumption signal across process boundaries.

use camino::Utf8Path;
use serde::Serialize;
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

use storyforge_types::StoreError;

/// Atomically write raw bytes to `path`.
///
/// # Errors
/// Returns `StoreError::Io` on any filesystem failure.
pub fn write_bytes_atomic(path: &Utf8Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Atomically write a value as pretty-printed JSON.
///
/// # Errors
/// `StoreError::Corrupt` if serialization fails, `StoreError::Io` otherwise.
pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Corrupt {
        path: path.to_string(),
        reason: format!("serialization failed: {e}"),
    })?;
    write_bytes_atomic(path, &json)
}
