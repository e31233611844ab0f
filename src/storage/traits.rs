//! Persistence trait consumed by the pipeline.

use super::audit::AuditLog;
use crate::Result;
use crate::models::{AnalysisResult, CrossSessionPattern, SessionInfo, SuggestionSet};
use std::path::PathBuf;

/// Persistence for pipeline output.
///
/// Implementations must tolerate calls from concurrently running session
/// tasks; in particular audit updates must not lose each other's writes.
pub trait PipelineStore: Send + Sync {
    /// Saves one session's analysis result.
    fn save_analysis_result(&self, result: &AnalysisResult) -> Result<PathBuf>;

    /// Saves cross-session patterns.
    fn save_cross_session_patterns(&self, patterns: &[CrossSessionPattern]) -> Result<PathBuf>;

    /// Saves a suggestion set and makes it the latest.
    fn save_suggestion_set(&self, set: &SuggestionSet) -> Result<PathBuf>;

    /// Loads the audit log, empty when none exists yet.
    fn load_audit_log(&self) -> Result<AuditLog>;

    /// Records that a session was analyzed.
    fn mark_session_analyzed(&self, session: &SessionInfo, insight_count: usize) -> Result<()>;

    /// Records that cross-session synthesis completed.
    fn mark_cross_session_done(&self) -> Result<()>;
}
