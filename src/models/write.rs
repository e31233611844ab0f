//! Apply outcome types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// What the applier did to the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAction {
    /// A new file was written.
    Created,
    /// An existing file was changed (or intentionally left unchanged).
    Modified,
}

impl WriteAction {
    /// Returns the action as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
        }
    }
}

impl fmt::Display for WriteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of applying one suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    /// Whether the edit (or its no-op equivalent) succeeded.
    pub success: bool,
    /// What happened to the file.
    pub action: WriteAction,
    /// Absolute path of the target file.
    pub file_path: PathBuf,
    /// Backup copy taken before the edit, if one was needed.
    pub backup_path: Option<PathBuf>,
    /// Destination written by a `split`.
    #[serde(default)]
    pub split_path: Option<PathBuf>,
    /// True when the content was already present and nothing was written.
    #[serde(default)]
    pub unchanged: bool,
    /// User-facing failure message.
    pub error: Option<String>,
}

impl WriteResult {
    /// Successful outcome.
    #[must_use]
    pub const fn ok(action: WriteAction, file_path: PathBuf, backup_path: Option<PathBuf>) -> Self {
        Self {
            success: true,
            action,
            file_path,
            backup_path,
            split_path: None,
            unchanged: false,
            error: None,
        }
    }

    /// Successful no-op: the content is already in the file.
    #[must_use]
    pub const fn unchanged(file_path: PathBuf) -> Self {
        Self {
            success: true,
            action: WriteAction::Modified,
            file_path,
            backup_path: None,
            split_path: None,
            unchanged: true,
            error: None,
        }
    }

    /// Expected failure carrying a display-ready message.
    #[must_use]
    pub fn failed(action: WriteAction, file_path: PathBuf, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action,
            file_path,
            backup_path: None,
            split_path: None,
            unchanged: false,
            error: Some(error.into()),
        }
    }
}

/// One line of the append-only apply history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// When the apply was attempted (Unix seconds).
    pub timestamp: u64,
    /// Suggestion id.
    pub suggestion_id: String,
    /// Suggestion type.
    pub suggestion_type: super::SuggestionType,
    /// Suggestion title.
    pub title: String,
    /// Target file relative to the project.
    pub target_file: String,
    /// Whether the apply succeeded.
    pub success: bool,
    /// Action taken.
    pub action: WriteAction,
    /// Backup path, if any.
    pub backup_path: Option<PathBuf>,
    /// Failure message, if any.
    pub error: Option<String>,
}
