//! Sequential apply over a suggestion list.

use super::ApplySession;
use crate::Result;
use crate::models::{HistoryEntry, Suggestion, SuggestionStatus, WriteAction, WriteResult};
use crate::storage::FileStore;
use std::path::Path;
use tracing::warn;

/// Outcome of one suggestion within a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedSuggestion {
    /// Suggestion id.
    pub suggestion_id: String,
    /// Write outcome. Integrity and filesystem errors appear here as failures.
    pub result: WriteResult,
}

/// Summary of an [`apply_batch`] run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// One entry per attempted suggestion, in list order.
    pub outcomes: Vec<AppliedSuggestion>,
    /// Suggestions not eligible for this run.
    pub skipped: usize,
    /// Whether the rules cache was invalidated.
    pub cache_invalidated: bool,
}

impl BatchReport {
    /// Number of successful applies.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.success).count()
    }

    /// Number of failed applies.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.applied()
    }
}

/// Whether a suggestion in `status` is picked up by [`apply_batch`].
#[must_use]
pub const fn is_eligible(status: SuggestionStatus, include_pending: bool) -> bool {
    match status {
        SuggestionStatus::Accepted => true,
        SuggestionStatus::Pending => include_pending,
        SuggestionStatus::Rejected | SuggestionStatus::Applied => false,
    }
}

/// The suggestions [`apply_batch`] would attempt, in order.
#[must_use]
pub fn eligible_suggestions(suggestions: &[Suggestion], include_pending: bool) -> Vec<&Suggestion> {
    suggestions
        .iter()
        .filter(|s| is_eligible(s.status, include_pending))
        .collect()
}

/// Applies eligible suggestions one at a time inside `session`.
///
/// Accepted suggestions are applied, plus pending ones when
/// `include_pending` is set. Each attempt is appended to the store's
/// history. An error from one apply becomes a failed outcome and the batch
/// moves on.
///
/// # Errors
///
/// Returns an error only when the history or rules cache cannot be written.
pub fn apply_batch(
    session: &mut ApplySession,
    store: &FileStore,
    suggestions: &mut [Suggestion],
    project_root: &Path,
    include_pending: bool,
) -> Result<BatchReport> {
    let mut report = BatchReport::default();

    for suggestion in suggestions.iter_mut() {
        if !is_eligible(suggestion.status, include_pending) {
            report.skipped += 1;
            continue;
        }

        let result = match session.apply(suggestion, project_root, None) {
            Ok(result) => result,
            Err(e) => {
                warn!(suggestion_id = %suggestion.id, error = %e, "apply failed");
                WriteResult::failed(
                    WriteAction::Modified,
                    project_root.join(&suggestion.target_file),
                    e.to_string(),
                )
            },
        };

        if result.success {
            suggestion.status = SuggestionStatus::Applied;
        }

        store.append_history(&HistoryEntry {
            timestamp: crate::current_timestamp(),
            suggestion_id: suggestion.id.clone(),
            suggestion_type: suggestion.suggestion_type,
            title: suggestion.title.clone(),
            target_file: suggestion.target_file.clone(),
            success: result.success,
            action: result.action,
            backup_path: result.backup_path.clone(),
            error: result.error.clone(),
        })?;

        report.outcomes.push(AppliedSuggestion {
            suggestion_id: suggestion.id.clone(),
            result,
        });
    }

    if report.applied() > 0 {
        report.cache_invalidated = store.invalidate_rules_cache()?;
    }
    Ok(report)
}
