//! Atomic file replacement.

use crate::{Error, Result};
use serde::Serialize;
use std::fs::{self, Permissions};
use std::io::{ErrorKind, Write};
use std::path::Path;

/// Prefix of in-flight temporary files.
pub const TEMP_PREFIX: &str = ".tmp-";

/// Writes `content` to a uniquely named temp file next to `path`, then
/// renames it over `path`.
///
/// Parent directories are created as needed. An existing target keeps its
/// permissions; a new file gets `0o644` on unix. A failed write leaves the
/// target untouched and removes the temp file.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| Error::OperationFailed {
        operation: "create_dir".to_string(),
        cause: format!("{}: {e}", dir.display()),
    })?;

    let permissions = target_permissions(path)?;
    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)
        .map_err(|e| Error::operation("atomic_write", e))?;
    temp.write_all(content)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| Error::operation("atomic_write", e))?;
    if let Some(permissions) = permissions {
        temp.as_file()
            .set_permissions(permissions)
            .map_err(|e| Error::operation("atomic_write", e))?;
    }
    temp.persist(path).map_err(|e| Error::OperationFailed {
        operation: "atomic_write".to_string(),
        cause: format!("{}: {}", path.display(), e.error),
    })?;

    #[cfg(unix)]
    if let Ok(dir_file) = fs::File::open(dir) {
        let _ = dir_file.sync_all();
    }

    Ok(())
}

/// Mode the replacement file should carry.
fn target_permissions(path: &Path) -> Result<Option<Permissions>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.permissions())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(new_file_permissions()),
        Err(e) => Err(Error::OperationFailed {
            operation: "atomic_write".to_string(),
            cause: format!("{}: {e}", path.display()),
        }),
    }
}

#[cfg(unix)]
fn new_file_permissions() -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
const fn new_file_permissions() -> Option<Permissions> {
    None
}

/// Serializes `value` as pretty JSON and writes it atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::operation("serialize_json", e))?;
    atomic_write(path, json.as_bytes())
}
