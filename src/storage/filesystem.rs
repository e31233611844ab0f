//! Filesystem store for pipeline output and apply history.
//!
//! Layout under the store directory:
//!
//! ```text
//! <store>/
//! ├── analysis/<session-id>.json
//! ├── cross-session/patterns-<timestamp>.json
//! ├── suggestions/<set-id>.json
//! ├── suggestions/latest.json
//! ├── audit.json
//! ├── history.jsonl
//! ├── rules-cache.json
//! └── backups/
//! ```
//!
//! # Security
//!
//! Session and set ids become filenames, so they are validated to prevent
//! directory escape.

use super::atomic::write_json_atomic;
use super::audit::AuditLog;
use super::traits::PipelineStore;
use crate::models::{AnalysisResult, CrossSessionPattern, HistoryEntry, SessionInfo, SuggestionSet};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Maximum size of a JSON document read back from the store (16MB).
const MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// JSON-file store rooted at a project's store directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    audit_lock: Mutex<()>,
}

impl FileStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            audit_lock: Mutex::new(()),
        }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding pre-edit backups.
    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Path of the append-only apply history.
    #[must_use]
    pub fn history_path(&self) -> PathBuf {
        self.root.join("history.jsonl")
    }

    /// Path of the cached rules snapshot.
    #[must_use]
    pub fn rules_cache_path(&self) -> PathBuf {
        self.root.join("rules-cache.json")
    }

    fn audit_path(&self) -> PathBuf {
        self.root.join("audit.json")
    }

    /// Validates that a name is safe to use as a filename.
    fn is_safe_filename(name: &str) -> bool {
        // Only allow alphanumeric, dash, underscore
        !name.is_empty()
            && name.len() <= 255
            && name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    }

    fn keyed_path(&self, dir: &str, key: &str) -> Result<PathBuf> {
        if !Self::is_safe_filename(key) {
            return Err(Error::InvalidInput(format!(
                "'{key}' cannot be used as a store filename"
            )));
        }
        Ok(self.root.join(dir).join(format!("{key}.json")))
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::operation("read_store_file", e)),
        };
        if metadata.len() > MAX_FILE_SIZE {
            return Err(Error::InvalidInput(format!(
                "{} exceeds maximum size of {MAX_FILE_SIZE} bytes",
                path.display()
            )));
        }
        let json = fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_store_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| Error::OperationFailed {
                operation: "deserialize_json".to_string(),
                cause: format!("{}: {e}", path.display()),
            })
    }

    /// Loads a previously saved analysis result.
    pub fn load_analysis_result(&self, session_id: &str) -> Result<Option<AnalysisResult>> {
        Self::read_json(&self.keyed_path("analysis", session_id)?)
    }

    /// Loads the most recently saved suggestion set.
    pub fn load_latest_suggestion_set(&self) -> Result<Option<SuggestionSet>> {
        Self::read_json(&self.root.join("suggestions").join("latest.json"))
    }

    /// Persists an edited suggestion set under its own id and as latest.
    pub fn update_suggestion_set(&self, set: &SuggestionSet) -> Result<()> {
        self.save_suggestion_set(set).map(|_| ())
    }

    /// Saves the audit log.
    pub fn save_audit_log(&self, log: &AuditLog) -> Result<()> {
        write_json_atomic(&self.audit_path(), log)
    }

    fn update_audit(&self, update: impl FnOnce(&mut AuditLog)) -> Result<()> {
        let _guard = self
            .audit_lock
            .lock()
            .map_err(|e| Error::operation("lock_audit_log", e))?;
        let mut log = self.load_audit_log()?;
        update(&mut log);
        self.save_audit_log(&log)
    }

    /// Appends one entry to the apply history.
    pub fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::operation("create_dir", e))?;
        let line = serde_json::to_string(entry).map_err(|e| Error::operation("serialize_json", e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path())
            .map_err(|e| Error::operation("append_history", e))?;
        writeln!(file, "{line}").map_err(|e| Error::operation("append_history", e))
    }

    /// Reads the apply history, skipping unreadable lines.
    pub fn load_history(&self) -> Result<Vec<HistoryEntry>> {
        let content = match fs::read_to_string(self.history_path()) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::operation("read_history", e)),
        };
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }

    /// Deletes the cached rules snapshot. Returns whether one existed.
    pub fn invalidate_rules_cache(&self) -> Result<bool> {
        match fs::remove_file(self.rules_cache_path()) {
            Ok(()) => {
                debug!("rules cache invalidated");
                Ok(true)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::operation("invalidate_rules_cache", e)),
        }
    }
}

impl PipelineStore for FileStore {
    fn save_analysis_result(&self, result: &AnalysisResult) -> Result<PathBuf> {
        let path = self.keyed_path("analysis", &result.session_id)?;
        write_json_atomic(&path, result)?;
        Ok(path)
    }

    fn save_cross_session_patterns(&self, patterns: &[CrossSessionPattern]) -> Result<PathBuf> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let path = self
            .root
            .join("cross-session")
            .join(format!("patterns-{stamp}.json"));
        write_json_atomic(&path, patterns)?;
        Ok(path)
    }

    fn save_suggestion_set(&self, set: &SuggestionSet) -> Result<PathBuf> {
        let path = self.keyed_path("suggestions", &set.id)?;
        write_json_atomic(&path, set)?;
        write_json_atomic(&self.root.join("suggestions").join("latest.json"), set)?;
        Ok(path)
    }

    fn load_audit_log(&self) -> Result<AuditLog> {
        Ok(Self::read_json(&self.audit_path())?.unwrap_or_default())
    }

    fn mark_session_analyzed(&self, session: &SessionInfo, insight_count: usize) -> Result<()> {
        self.update_audit(|log| log.mark_analyzed(session, insight_count))
    }

    fn mark_cross_session_done(&self) -> Result<()> {
        self.update_audit(AuditLog::mark_cross_session_done)
    }
}
