//! Small file helpers for the JSON stores.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::LauncherError;

/// Read a file, mapping "not found" to `None`.
pub fn read_optional(path: &Path) -> Result<Option<String>, LauncherError> {
    match fs::read_to_string(path) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(LauncherError::Io(err)),
    }
}

/// Replace `path` with `data` by persisting a sibling temp file over it.
///
/// The temp file is created owner-only, so the stored file is too.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), LauncherError> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| LauncherError::Io(e.error))?;
    Ok(())
}
