//! Thin filesystem helpers that attach the offending path to every error.

use std::path::Path;

use crate::error::Error;
use crate::result::Result;

/// Read a whole file into a string.
///
/// # Errors
///
/// Returns `Error::FileReadFailed` if the file cannot be opened or is not UTF-8.
pub fn read_to_string(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|e| Error::file_read_failed(path, e.to_string()))
}

/// Write a string to a file, replacing any previous contents.
///
/// # Errors
///
/// Returns `Error::FileWriteFailed` if the file cannot be written.
pub fn write(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, contents).map_err(|e| Error::file_write_failed(path, e.to_string()))
}

/// Create a directory and all of its parents.
///
/// # Errors
///
/// Returns `Error::DirectoryCreationFailed` if any component cannot be created.
pub fn create_dir_all(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    std::fs::create_dir_all(path)
        .map_err(|e| Error::directory_creation_failed(path, e.to_string()))
}
