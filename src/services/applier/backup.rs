//! Once-per-session backups of files about to be edited.

use crate::{Error, Result};
use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Tracks which files were already backed up during one apply session.
///
/// The first touch of a file copies its bytes; later touches reuse that
/// backup, so it always holds the state from before the session's first edit.
#[derive(Debug, Default)]
pub struct BackupTracker {
    dir: PathBuf,
    taken: HashMap<PathBuf, PathBuf>,
}

impl BackupTracker {
    /// Creates a tracker writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            taken: HashMap::new(),
        }
    }

    /// Number of files backed up so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.taken.len()
    }

    /// Whether nothing has been backed up yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }

    /// Backup already taken for `source`, if any.
    #[must_use]
    pub fn backup_for(&self, source: &Path) -> Option<&Path> {
        self.taken.get(source).map(PathBuf::as_path)
    }

    /// Backs up `source` unless it was already backed up this session.
    pub fn ensure(&mut self, source: &Path) -> Result<PathBuf> {
        if let Some(existing) = self.taken.get(source) {
            return Ok(existing.clone());
        }

        fs::create_dir_all(&self.dir).map_err(|e| Error::OperationFailed {
            operation: "create_backup_dir".to_string(),
            cause: format!("{}: {e}", self.dir.display()),
        })?;

        let basename = source
            .file_name()
            .map_or_else(|| "rules".into(), |n| n.to_string_lossy());
        let stamp = Utc::now()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        let mut backup = self.dir.join(format!("{basename}.{stamp}"));
        let mut suffix = 1;
        while backup.exists() {
            backup = self.dir.join(format!("{basename}.{stamp}.{suffix}"));
            suffix += 1;
        }

        fs::copy(source, &backup).map_err(|e| Error::OperationFailed {
            operation: "backup_file".to_string(),
            cause: format!("{}: {e}", source.display()),
        })?;
        debug!(source = %source.display(), backup = %backup.display(), "backup created");

        self.taken.insert(source.to_path_buf(), backup.clone());
        Ok(backup)
    }
}
