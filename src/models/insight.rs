//! Session analysis types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A transcript session eligible for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session identifier.
    pub session_id: String,
    /// Path to the transcript log.
    pub path: PathBuf,
    /// Last-modified time of the transcript (Unix seconds).
    pub modified_at: u64,
    /// Transcript size in bytes.
    pub size: u64,
}

impl SessionInfo {
    /// Creates a session descriptor.
    #[must_use]
    pub fn new(session_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            path: path.into(),
            modified_at: 0,
            size: 0,
        }
    }
}

/// A recurring correction or missing piece of project knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    /// Insight identifier.
    pub id: String,
    /// Session the insight was observed in.
    pub session_id: String,
    /// Free-form category (`correction`, `missing_context`, `preference`, ...).
    pub category: String,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Transcript excerpts supporting the insight.
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Confidence (0.0 to 1.0).
    pub confidence: f32,
}

/// Analysis output for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Session identifier.
    pub session_id: String,
    /// Analysis time (Unix seconds).
    pub analyzed_at: u64,
    /// Extracted insights.
    pub insights: Vec<Insight>,
    /// Wall time of the analysis call.
    #[serde(default)]
    pub duration_ms: u64,
    /// Model used, if reported.
    #[serde(default)]
    pub model: Option<String>,
    /// True for placeholder results produced without calling the LLM.
    #[serde(default)]
    pub dry_run: bool,
}

impl AnalysisResult {
    /// Zero-cost placeholder used by dry runs.
    #[must_use]
    pub fn placeholder(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            analyzed_at: crate::current_timestamp(),
            insights: Vec::new(),
            duration_ms: 0,
            model: None,
            dry_run: true,
        }
    }
}

/// A pattern observed across several sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossSessionPattern {
    /// Pattern identifier.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Sessions the pattern appeared in.
    #[serde(default)]
    pub session_ids: Vec<String>,
    /// Insights the pattern groups.
    #[serde(default)]
    pub insight_ids: Vec<String>,
    /// Number of occurrences.
    #[serde(default)]
    pub frequency: usize,
    /// Confidence (0.0 to 1.0).
    pub confidence: f32,
}

impl CrossSessionPattern {
    /// Converts the pattern into a pseudo-insight for suggestion generation.
    ///
    /// The insight id is the pattern id, so suggestions citing it can be
    /// traced back to every session in `session_ids`.
    #[must_use]
    pub fn to_insight(&self) -> Insight {
        Insight {
            id: self.id.clone(),
            session_id: self
                .session_ids
                .first()
                .cloned()
                .unwrap_or_else(|| "cross-session".to_string()),
            category: "cross_session_pattern".to_string(),
            title: self.title.clone(),
            description: format!(
                "{} (seen {} times across {} sessions)",
                self.description,
                self.frequency.max(self.session_ids.len()),
                self.session_ids.len()
            ),
            evidence: Vec::new(),
            confidence: self.confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_empty_dry_run() {
        let result = AnalysisResult::placeholder("s1");
        assert!(result.dry_run);
        assert!(result.insights.is_empty());
        assert_eq!(result.duration_ms, 0);
    }

    #[test]
    fn test_pattern_to_insight() {
        let pattern = CrossSessionPattern {
            id: "pat_1".to_string(),
            title: "Uses wrong package manager".to_string(),
            description: "Agent runs npm instead of pnpm".to_string(),
            session_ids: vec!["s1".to_string(), "s2".to_string()],
            insight_ids: vec!["i1".to_string(), "i2".to_string()],
            frequency: 3,
            confidence: 0.8,
        };
        let insight = pattern.to_insight();
        assert_eq!(insight.id, "pat_1");
        assert_eq!(insight.session_id, "s1");
        assert_eq!(insight.category, "cross_session_pattern");
        assert!(insight.description.contains("3 times across 2 sessions"));
    }
}
