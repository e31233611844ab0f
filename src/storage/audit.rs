//! Session analysis bookkeeping.

use crate::models::SessionInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Audit record for one analyzed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAudit {
    /// When the session was analyzed (Unix seconds).
    pub analyzed_at: u64,
    /// The transcript's modification time at analysis.
    pub modified_at: u64,
    /// Insights found.
    pub insight_count: usize,
}

/// Which sessions have been analyzed, and when.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    /// Per-session records keyed by session id.
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionAudit>,
    /// Last completed cross-session synthesis (Unix seconds).
    #[serde(default)]
    pub cross_session_done_at: Option<u64>,
}

impl AuditLog {
    /// Whether a session is unseen or changed since it was analyzed.
    #[must_use]
    pub fn needs_analysis(&self, session: &SessionInfo) -> bool {
        self.sessions
            .get(&session.session_id)
            .is_none_or(|audit| session.modified_at > audit.modified_at)
    }

    /// Records a completed analysis.
    pub fn mark_analyzed(&mut self, session: &SessionInfo, insight_count: usize) {
        self.sessions.insert(
            session.session_id.clone(),
            SessionAudit {
                analyzed_at: crate::current_timestamp(),
                modified_at: session.modified_at,
                insight_count,
            },
        );
    }

    /// Stamps cross-session synthesis as done.
    pub fn mark_cross_session_done(&mut self) {
        self.cross_session_done_at = Some(crate::current_timestamp());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_analysis_tracks_modification() {
        let mut log = AuditLog::default();
        let mut session = SessionInfo::new("s1", "/logs/s1.jsonl");
        session.modified_at = 100;
        assert!(log.needs_analysis(&session));

        log.mark_analyzed(&session, 4);
        assert!(!log.needs_analysis(&session));
        assert_eq!(log.sessions["s1"].insight_count, 4);

        session.modified_at = 200;
        assert!(log.needs_analysis(&session));
    }

    #[test]
    fn test_cross_session_stamp() {
        let mut log = AuditLog::default();
        assert!(log.cross_session_done_at.is_none());
        log.mark_cross_session_done();
        assert!(log.cross_session_done_at.is_some());
    }
}
