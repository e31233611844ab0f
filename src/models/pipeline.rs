//! Pipeline output types.

use super::{AnalysisResult, CrossSessionPattern, Suggestion, SuggestionType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Per-session outcome delivered to callbacks and collected in the run result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPipelineResult {
    /// Session identifier.
    pub session_id: String,
    /// Analysis result, absent when analysis failed.
    pub analysis: Option<AnalysisResult>,
    /// Suggestions this session newly admitted into the accumulated set.
    pub new_suggestions: Vec<Suggestion>,
    /// Raw suggestions the LLM proposed (before building and dedup).
    pub raw_suggestion_count: usize,
    /// Failure message when the session degraded to an empty result.
    pub error: Option<String>,
}

impl SessionPipelineResult {
    /// Empty-but-present result for a failed session.
    #[must_use]
    pub fn failed(session_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            analysis: None,
            new_suggestions: Vec::new(),
            raw_suggestion_count: 0,
            error: Some(error.into()),
        }
    }

    /// Whether the session completed without error.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of the cross-session synthesis phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossSessionResult {
    /// Patterns found.
    pub patterns: Vec<CrossSessionPattern>,
    /// Suggestions newly admitted from those patterns.
    pub new_suggestions: Vec<Suggestion>,
}

/// Summary counts over a suggestion set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionStats {
    /// Number of suggestions.
    pub total: usize,
    /// Count per suggestion type.
    pub by_type: BTreeMap<String, usize>,
    /// Count per priority.
    pub by_priority: BTreeMap<String, usize>,
    /// Rules in the snapshot before applying.
    pub current_rule_count: usize,
    /// Estimated rule count after applying everything.
    pub estimated_rule_count: usize,
}

impl SuggestionStats {
    /// Computes stats for a suggestion list against the current rule count.
    ///
    /// The estimate counts `add` as +1, `remove` as -1, and `consolidate` as
    /// one merged rule replacing its removed parts; `update` and `split` keep
    /// the count. It never goes below zero.
    #[must_use]
    pub fn compute(suggestions: &[Suggestion], current_rule_count: usize) -> Self {
        let mut stats = Self {
            total: suggestions.len(),
            current_rule_count,
            ..Self::default()
        };

        let mut estimate = i64::try_from(current_rule_count).unwrap_or(i64::MAX);
        for suggestion in suggestions {
            *stats
                .by_type
                .entry(suggestion.suggestion_type.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_priority
                .entry(suggestion.priority.as_str().to_string())
                .or_default() += 1;

            estimate += match suggestion.suggestion_type {
                SuggestionType::Add => 1,
                SuggestionType::Remove => -1,
                SuggestionType::Consolidate => {
                    let removed = suggestion
                        .diff
                        .parts
                        .iter()
                        .filter(|p| p.removed_text().is_some())
                        .count();
                    1 - i64::try_from(removed).unwrap_or(0)
                },
                SuggestionType::Update | SuggestionType::Split => 0,
            };
        }
        stats.estimated_rule_count = usize::try_from(estimate.max(0)).unwrap_or(0);
        stats
    }
}

/// Persisted set of suggestions from one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionSet {
    /// Set identifier.
    pub id: String,
    /// Project root the set targets.
    pub project_root: PathBuf,
    /// Creation time (Unix seconds).
    pub created_at: u64,
    /// Sessions that contributed.
    pub session_ids: Vec<String>,
    /// Deduplicated, ranked suggestions.
    pub suggestions: Vec<Suggestion>,
    /// Summary counts.
    pub stats: SuggestionStats,
}

impl SuggestionSet {
    /// Creates a set with a fresh time-ordered id.
    #[must_use]
    pub fn new(
        project_root: impl Into<PathBuf>,
        session_ids: Vec<String>,
        suggestions: Vec<Suggestion>,
        stats: SuggestionStats,
    ) -> Self {
        Self {
            id: format!("set_{}", uuid::Uuid::now_v7().simple()),
            project_root: project_root.into(),
            created_at: crate::current_timestamp(),
            session_ids,
            suggestions,
            stats,
        }
    }
}

/// Counts over a whole pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    /// Sessions handed to the run (new plus already analyzed).
    pub sessions_total: usize,
    /// Sessions that completed successfully.
    pub sessions_succeeded: usize,
    /// Sessions that degraded to an empty result.
    pub sessions_failed: usize,
    /// Insights across all successful sessions.
    pub insights_total: usize,
    /// Suggestions in the final accumulated set.
    pub suggestions_total: usize,
    /// Wall time of the run.
    pub duration_ms: u64,
}

/// Result of a full pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    /// Per-session results in session order.
    pub sessions: Vec<SessionPipelineResult>,
    /// Cross-session phase outcome, if it ran and found patterns.
    pub cross_session: Option<CrossSessionResult>,
    /// Persisted set, if any suggestions survived.
    pub suggestion_set: Option<SuggestionSet>,
    /// Run counts.
    pub stats: PipelineStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiffLine, DiffType, Priority, SuggestionDiff, SuggestionStatus};

    fn suggestion(suggestion_type: SuggestionType, diff: SuggestionDiff) -> Suggestion {
        Suggestion {
            id: Suggestion::generate_id(),
            suggestion_type,
            priority: Priority::Medium,
            confidence: 0.7,
            title: "t".to_string(),
            rationale: String::new(),
            target_file: "CLAUDE.md".to_string(),
            target_section: None,
            diff,
            source_insight_ids: Vec::new(),
            source_session_ids: Vec::new(),
            split_target: None,
            status: SuggestionStatus::Pending,
        }
    }

    #[test]
    fn test_stats_estimate() {
        let add = suggestion(
            SuggestionType::Add,
            SuggestionDiff::add(vec![DiffLine::new("- a")], None, None),
        );
        let remove = suggestion(
            SuggestionType::Remove,
            SuggestionDiff::remove(vec![DiffLine::new("- b")], None),
        );
        let consolidate = suggestion(
            SuggestionType::Consolidate,
            SuggestionDiff::composite(
                DiffType::Replace,
                None,
                vec![
                    SuggestionDiff::remove(vec![DiffLine::new("- c")], None),
                    SuggestionDiff::remove(vec![DiffLine::new("- d")], None),
                    SuggestionDiff::remove(vec![DiffLine::new("- e")], None),
                    SuggestionDiff::add(vec![DiffLine::new("- cde")], None, None),
                ],
            ),
        );

        let stats = SuggestionStats::compute(&[add, remove, consolidate], 10);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type.get("add"), Some(&1));
        assert_eq!(stats.by_priority.get("medium"), Some(&3));
        // 10 + 1 - 1 - 2
        assert_eq!(stats.estimated_rule_count, 8);
    }

    #[test]
    fn test_stats_estimate_floors_at_zero() {
        let remove = suggestion(
            SuggestionType::Remove,
            SuggestionDiff::remove(vec![DiffLine::new("- b")], None),
        );
        let stats = SuggestionStats::compute(&[remove.clone(), remove], 1);
        assert_eq!(stats.estimated_rule_count, 0);
    }
}
