//! Applies suggestions to rule files on disk.
//!
//! Every edit re-reads the live file instead of trusting the snapshot the
//! suggestion was built from, backs the file up on first touch, writes via
//! temp-file-then-rename and re-reads the result to confirm it took effect.
//!
//! Expected failures (missing file, text not found, missing split target)
//! come back as `WriteResult { success: false, error }` with a message ready
//! for display. `Err` is reserved for integrity violations and filesystem
//! errors.
//!
//! # Example
//!
//! ```rust,ignore
//! use rulewright::services::applier::ApplySession;
//!
//! let mut session = ApplySession::new(store.root());
//! let result = session.apply(&suggestion, project_root, None)?;
//! assert!(result.success, "{}", result.error.unwrap_or_default());
//! ```

mod backup;
mod batch;

pub use backup::BackupTracker;
pub use batch::{AppliedSuggestion, BatchReport, apply_batch, eligible_suggestions, is_eligible};

use crate::markdown::{
    self, collapse_blank_lines, content_already_present, extract_section, find_heading,
    find_insertion_point, remove_text, replace_text, shift_headings,
};
use crate::models::{Suggestion, SuggestionType, WriteAction, WriteResult};
use crate::storage::atomic_write;
use crate::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, instrument};

/// Applier tuning.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `RULEWRIGHT_APPLY_ALREADY_PRESENT_THRESHOLD` | f32 | `0.8` | Share of new lines already in the file that makes an add a no-op |
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// An add is skipped when more than this share of its lines already exist.
    pub already_present_threshold: f32,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            already_present_threshold: 0.8,
        }
    }
}

impl ApplyConfig {
    /// Creates a configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides on top of existing values.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("RULEWRIGHT_APPLY_ALREADY_PRESENT_THRESHOLD") {
            if let Ok(threshold) = v.trim().parse::<f32>() {
                if (0.0..=1.0).contains(&threshold) {
                    self.already_present_threshold = threshold;
                }
            }
        }
        self
    }

    /// Builder method to set the already-present threshold.
    #[must_use]
    pub const fn with_already_present_threshold(mut self, threshold: f32) -> Self {
        self.already_present_threshold = threshold;
        self
    }
}

/// One apply or review run.
///
/// Constructing a session starts a fresh backup scope: each file touched
/// during the session's lifetime is backed up exactly once.
#[derive(Debug)]
pub struct ApplySession {
    backups: BackupTracker,
    config: ApplyConfig,
}

/// Resolves a project-relative path, rejecting anything that could escape.
fn resolve_in_project(project_root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative.trim());
    if relative.as_os_str().is_empty() {
        return None;
    }
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        None
    } else {
        Some(project_root.join(relative))
    }
}

fn with_trailing_newline(mut content: String) -> String {
    if !content.ends_with('\n') {
        content.push('\n');
    }
    content
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.trim().is_empty())
}

/// Inserts `text` at the end of `section`, creating the section at the end
/// of the document when it does not exist, or appends it when no section
/// is given.
fn insert_content(content: &str, text: &str, section: Option<&str>) -> String {
    let text = text.trim_matches('\n');
    let (lines, _) = markdown::split_lines(content);

    if let Some(section) = section {
        if find_heading(&lines, section).is_some() {
            let at = find_insertion_point(&lines, Some(section));
            let mut edited: Vec<&str> = lines[..at].to_vec();
            edited.extend(text.lines());
            edited.extend_from_slice(&lines[at..]);
            return markdown::join_lines(&edited, true);
        }
        let base = content.trim_end();
        return if base.is_empty() {
            format!("## {section}\n\n{text}\n")
        } else {
            format!("{base}\n\n## {section}\n\n{text}\n")
        };
    }

    let base = content.trim_end();
    if base.is_empty() {
        format!("{text}\n")
    } else {
        format!("{base}\n\n{text}\n")
    }
}

/// First non-blank line of `content`, trimmed.
fn first_meaningful_line(content: &str) -> Option<&str> {
    content.lines().map(str::trim).find(|l| !l.is_empty())
}

impl ApplySession {
    /// Starts a session whose backups go to `<store_dir>/backups/`.
    #[must_use]
    pub fn new(store_dir: impl AsRef<Path>) -> Self {
        Self {
            backups: BackupTracker::new(store_dir.as_ref().join("backups")),
            config: ApplyConfig::default(),
        }
    }

    /// Replaces the applier configuration.
    #[must_use]
    pub const fn with_config(mut self, config: ApplyConfig) -> Self {
        self.config = config;
        self
    }

    /// Backups taken so far.
    #[must_use]
    pub const fn backups(&self) -> &BackupTracker {
        &self.backups
    }

    /// Applies one suggestion under `project_root`.
    ///
    /// `edited_content`, when given, replaces the suggestion's added text
    /// (the reviewer edited it before accepting).
    ///
    /// # Errors
    ///
    /// Returns [`Error::IntegrityViolation`] when a write did not take effect,
    /// and [`Error::OperationFailed`] for filesystem failures.
    #[instrument(skip_all, fields(suggestion_id = %suggestion.id, target_file = %suggestion.target_file))]
    pub fn apply(
        &mut self,
        suggestion: &Suggestion,
        project_root: &Path,
        edited_content: Option<&str>,
    ) -> Result<WriteResult> {
        let outcome = self.dispatch(suggestion, project_root, edited_content);
        match &outcome {
            Ok(result) if result.success => {
                metrics::counter!("suggestions_applied_total").increment(1);
                info!(action = %result.action, unchanged = result.unchanged, "suggestion applied");
            },
            Ok(result) => {
                metrics::counter!("suggestions_apply_failed_total").increment(1);
                debug!(error = result.error.as_deref().unwrap_or(""), "suggestion not applied");
            },
            Err(_) => {
                metrics::counter!("suggestions_apply_failed_total").increment(1);
            },
        }
        outcome
    }

    fn dispatch(
        &mut self,
        suggestion: &Suggestion,
        project_root: &Path,
        edited_content: Option<&str>,
    ) -> Result<WriteResult> {
        let relative = suggestion.target_file.as_str();
        let Some(path) = resolve_in_project(project_root, relative) else {
            return Ok(WriteResult::failed(
                WriteAction::Modified,
                project_root.join(relative),
                format!("Invalid target path: {relative}"),
            ));
        };
        let edited = edited_content.map(String::from);

        if !path.is_file() {
            return match suggestion.suggestion_type {
                SuggestionType::Add | SuggestionType::Update | SuggestionType::Consolidate => {
                    Self::create(suggestion, &path, edited)
                },
                SuggestionType::Remove | SuggestionType::Split => Ok(WriteResult::failed(
                    WriteAction::Modified,
                    path,
                    format!("File not found: {relative}"),
                )),
            };
        }

        let content = fs::read_to_string(&path).map_err(|e| Error::OperationFailed {
            operation: "read_rules_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        match suggestion.suggestion_type {
            SuggestionType::Add => self.apply_add(suggestion, &path, &content, edited),
            SuggestionType::Update => self.apply_update(suggestion, &path, &content, edited),
            SuggestionType::Remove => self.apply_remove(suggestion, &path, &content),
            SuggestionType::Consolidate => {
                self.apply_consolidate(suggestion, &path, &content, edited)
            },
            SuggestionType::Split => self.apply_split(suggestion, project_root, &path, &content),
        }
    }

    fn create(
        suggestion: &Suggestion,
        path: &Path,
        edited: Option<String>,
    ) -> Result<WriteResult> {
        let Some(text) = non_empty(edited).or_else(|| non_empty(Some(suggestion.added_text())))
        else {
            return Ok(WriteResult::failed(
                WriteAction::Created,
                path.to_path_buf(),
                "No content to add",
            ));
        };
        let content = with_trailing_newline(text);
        atomic_write(path, content.as_bytes())?;
        verify_written(path, &content)?;
        Ok(WriteResult::ok(WriteAction::Created, path.to_path_buf(), None))
    }

    /// Backs up, writes atomically and verifies.
    fn commit(&mut self, path: &Path, new_content: &str, expected: &str) -> Result<PathBuf> {
        let backup = self.backups.ensure(path)?;
        atomic_write(path, new_content.as_bytes())?;
        verify_written(path, expected)?;
        Ok(backup)
    }

    fn apply_add(
        &mut self,
        suggestion: &Suggestion,
        path: &Path,
        content: &str,
        edited: Option<String>,
    ) -> Result<WriteResult> {
        let Some(text) = non_empty(edited).or_else(|| non_empty(Some(suggestion.added_text())))
        else {
            return Ok(WriteResult::failed(
                WriteAction::Modified,
                path.to_path_buf(),
                "No content to add",
            ));
        };

        if content_already_present(content, &text, self.config.already_present_threshold) {
            debug!("content already present, nothing to write");
            return Ok(WriteResult::unchanged(path.to_path_buf()));
        }

        let section = suggestion
            .diff
            .in_section
            .as_deref()
            .or(suggestion.target_section.as_deref());
        let updated = insert_content(content, &text, section);
        let backup = self.commit(path, &updated, &text)?;
        Ok(WriteResult::ok(WriteAction::Modified, path.to_path_buf(), Some(backup)))
    }

    fn apply_update(
        &mut self,
        suggestion: &Suggestion,
        path: &Path,
        content: &str,
        edited: Option<String>,
    ) -> Result<WriteResult> {
        let Some(old) = suggestion.diff.removed_text() else {
            return self.apply_add(suggestion, path, content, edited);
        };
        let Some(new) = non_empty(edited).or_else(|| suggestion.diff.added_text()) else {
            return Ok(WriteResult::failed(
                WriteAction::Modified,
                path.to_path_buf(),
                "No content to add",
            ));
        };

        let Some(updated) = replace_text(content, &old, &new) else {
            return Ok(WriteResult::failed(
                WriteAction::Modified,
                path.to_path_buf(),
                format!(
                    "Could not find text to replace in {}. Skipping this suggestion.",
                    suggestion.target_file
                ),
            ));
        };
        let backup = self.commit(path, &updated, &new)?;
        Ok(WriteResult::ok(WriteAction::Modified, path.to_path_buf(), Some(backup)))
    }

    fn apply_remove(
        &mut self,
        suggestion: &Suggestion,
        path: &Path,
        content: &str,
    ) -> Result<WriteResult> {
        let Some(old) = suggestion.diff.removed_text() else {
            return Ok(WriteResult::failed(
                WriteAction::Modified,
                path.to_path_buf(),
                "No text to remove",
            ));
        };
        let Some(updated) = remove_text(content, &old) else {
            return Ok(WriteResult::failed(
                WriteAction::Modified,
                path.to_path_buf(),
                format!(
                    "Could not find text to remove in {}. Skipping this suggestion.",
                    suggestion.target_file
                ),
            ));
        };
        let updated = collapse_blank_lines(&updated);
        let backup = self.commit(path, &updated, &updated)?;
        Ok(WriteResult::ok(WriteAction::Modified, path.to_path_buf(), Some(backup)))
    }

    fn apply_consolidate(
        &mut self,
        suggestion: &Suggestion,
        path: &Path,
        content: &str,
        edited: Option<String>,
    ) -> Result<WriteResult> {
        let diff = &suggestion.diff;
        let add_part = diff.add_part();
        let Some(text) = non_empty(edited)
            .or_else(|| add_part.and_then(crate::models::SuggestionDiff::added_text))
            .or_else(|| diff.added_text())
        else {
            return Ok(WriteResult::failed(
                WriteAction::Modified,
                path.to_path_buf(),
                "No content to add",
            ));
        };

        let mut updated = content.to_string();
        let removals = diff
            .parts
            .iter()
            .filter_map(crate::models::SuggestionDiff::removed_text)
            .chain(diff.removed_text());
        for old in removals {
            match remove_text(&updated, &old) {
                Some(next) => updated = next,
                None => debug!(text = %old, "consolidate part not found, skipping"),
            }
        }
        let updated = collapse_blank_lines(&updated);

        let section = add_part
            .and_then(|p| p.in_section.as_deref())
            .or(diff.in_section.as_deref())
            .or(suggestion.target_section.as_deref());
        let updated = insert_content(&updated, &text, section);
        let backup = self.commit(path, &updated, &text)?;
        Ok(WriteResult::ok(WriteAction::Modified, path.to_path_buf(), Some(backup)))
    }

    fn apply_split(
        &mut self,
        suggestion: &Suggestion,
        project_root: &Path,
        path: &Path,
        content: &str,
    ) -> Result<WriteResult> {
        let Some(split_target) = suggestion.split_target.as_deref() else {
            return Ok(WriteResult::failed(
                WriteAction::Modified,
                path.to_path_buf(),
                "No split target file specified",
            ));
        };
        let Some(section) = suggestion.target_section.as_deref() else {
            return Ok(WriteResult::failed(
                WriteAction::Modified,
                path.to_path_buf(),
                "No section specified for split",
            ));
        };
        let Some(destination) = resolve_in_project(project_root, split_target) else {
            return Ok(WriteResult::failed(
                WriteAction::Modified,
                path.to_path_buf(),
                format!("Invalid target path: {split_target}"),
            ));
        };

        let (lines, trailing) = markdown::split_lines(content);
        let Some(range) = extract_section(&lines, section) else {
            return Ok(WriteResult::failed(
                WriteAction::Modified,
                path.to_path_buf(),
                format!("Section \"{section}\" not found in {}", suggestion.target_file),
            ));
        };

        let backup = self.backups.ensure(path)?;

        let body = markdown::join_lines(&shift_headings(range.slice(&lines)), true);
        if destination.is_file() {
            self.backups.ensure(&destination)?;
        }
        atomic_write(&destination, body.as_bytes())?;
        verify_written(&destination, &body)?;

        let mut remaining: Vec<&str> = lines[..range.start].to_vec();
        remaining.extend_from_slice(&lines[range.end..]);
        let updated = collapse_blank_lines(&markdown::join_lines(&remaining, trailing));
        atomic_write(path, updated.as_bytes())?;
        verify_written(path, &updated)?;

        info!(
            section,
            destination = %destination.display(),
            moved_lines = range.len(),
            "section split into its own file"
        );
        let mut result = WriteResult::ok(WriteAction::Modified, path.to_path_buf(), Some(backup));
        result.split_path = Some(destination);
        Ok(result)
    }
}

/// Re-reads `path` and confirms the first meaningful line of `expected` is there.
fn verify_written(path: &Path, expected: &str) -> Result<()> {
    let Some(expected) = first_meaningful_line(expected) else {
        return Ok(());
    };
    let written = fs::read_to_string(path).map_err(|e| Error::OperationFailed {
        operation: "verify_write".to_string(),
        cause: format!("{}: {e}", path.display()),
    })?;
    if written.contains(expected) {
        Ok(())
    } else {
        Err(Error::IntegrityViolation {
            path: path.display().to_string(),
            reason: format!("expected line not found after write: {expected}"),
        })
    }
}
