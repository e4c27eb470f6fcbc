use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Result, RetrievalError};

/// Writes `bytes` to `path` via a temp file in the same directory and a
/// rename, so readers see either the old file or the complete new one.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| RetrievalError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| RetrievalError::io(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| RetrievalError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| RetrievalError::io(path, e.error))?;
    Ok(())
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| RetrievalError::io(path, e))
}
