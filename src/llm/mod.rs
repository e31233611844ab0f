//! LLM collaborator interface.
//!
//! Model invocation itself lives outside this crate. This module defines the
//! calls the pipeline makes, and the trust boundary for what comes back:
//! responses are treated as untrusted text, JSON is extracted from them, and
//! every suggestion passes through [`LlmSuggestion::from_value`].

use crate::models::{
    AnalysisResult, CrossSessionPattern, Insight, LlmSuggestion, RulesSnapshot, SessionInfo,
    Suggestion,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::future::Future;
use std::path::Path;

/// Per-call model settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Model override, if any.
    pub model: Option<String>,
    /// Ask the backend for verbose diagnostics.
    pub verbose: bool,
}

/// Output of the combined analyze-and-suggest call.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeAndSuggest {
    /// Session analysis.
    pub analysis: AnalysisResult,
    /// Raw suggestions proposed in the same call.
    pub raw_suggestions: Vec<LlmSuggestion>,
}

/// Output of a suggestion-only call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedSuggestions {
    /// Raw suggestions.
    pub suggestions: Vec<LlmSuggestion>,
    /// How many proposals the model marked as skipped.
    pub skipped: usize,
    /// Wall time of the call.
    pub duration_ms: u64,
}

impl GeneratedSuggestions {
    /// Wraps parsed suggestions, counting the skipped ones.
    #[must_use]
    pub fn from_parsed(suggestions: Vec<LlmSuggestion>, duration_ms: u64) -> Self {
        let skipped = suggestions.iter().filter(|s| s.skipped).count();
        Self {
            suggestions,
            skipped,
            duration_ms,
        }
    }
}

/// The model calls the pipeline depends on.
///
/// Implementations enforce their own timeouts and report them as errors.
pub trait SuggestionBackend: Send + Sync + 'static {
    /// Analyzes one session and proposes suggestions in a single call.
    fn analyze_and_suggest(
        &self,
        session: &SessionInfo,
        snapshot: &RulesSnapshot,
        options: &ModelOptions,
    ) -> impl Future<Output = Result<AnalyzeAndSuggest>> + Send;

    /// Proposes suggestions for already-extracted insights.
    ///
    /// `existing_context` lists suggestions already accumulated, one per line,
    /// so the model can avoid repeating them.
    fn generate_suggestions(
        &self,
        insights: &[Insight],
        snapshot: &RulesSnapshot,
        existing_context: &str,
        options: &ModelOptions,
    ) -> impl Future<Output = Result<GeneratedSuggestions>> + Send;

    /// Finds patterns recurring across analyzed sessions.
    fn synthesize_cross_sessions(
        &self,
        results: &[AnalysisResult],
        project_root: &Path,
        options: &ModelOptions,
    ) -> impl Future<Output = Result<Vec<CrossSessionPattern>>> + Send;
}

/// Extracts JSON from an LLM response, handling markdown code blocks.
#[must_use]
pub fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    // Handle ```json ... ``` blocks
    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // Handle ``` ... ``` blocks (without json marker)
    if let Some(start) = trimmed.find("```") {
        let content_start = start + 3;
        let after_marker = &trimmed[content_start..];
        let json_start = after_marker
            .find(['{', '['])
            .map_or(content_start, |pos| content_start + pos);
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // Handle raw JSON, whichever of object or array opens first
    let (open, close) = match (trimmed.find('{'), trimmed.find('[')) {
        (Some(brace), Some(bracket)) if bracket < brace => ('[', ']'),
        (Some(_), _) => ('{', '}'),
        (None, Some(_)) => ('[', ']'),
        (None, None) => return trimmed,
    };
    if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
        if start < end {
            return &trimmed[start..=end];
        }
    }

    trimmed
}

/// Parses raw suggestions out of an LLM response.
///
/// Accepts `{"suggestions": [...]}`, a bare array, or a single suggestion
/// object. Elements that are not objects or lack a target file are dropped.
pub fn parse_suggestions_response(response: &str) -> Result<Vec<LlmSuggestion>> {
    let json_str = extract_json_from_response(response);
    let value: Value = serde_json::from_str(json_str).map_err(|e| Error::OperationFailed {
        operation: "parse_suggestions_response".to_string(),
        cause: format!("Invalid JSON: {e}"),
    })?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("suggestions") {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(Error::InvalidInput(
                    "'suggestions' must be an array".to_string(),
                ));
            },
            None => vec![Value::Object(obj)],
        },
        _ => {
            return Err(Error::InvalidInput(
                "response is neither a suggestion list nor an object".to_string(),
            ));
        },
    };

    let total = items.len();
    let parsed: Vec<LlmSuggestion> = items.iter().filter_map(LlmSuggestion::from_value).collect();
    if parsed.len() < total {
        tracing::debug!(
            dropped = total - parsed.len(),
            "dropped malformed suggestions from response"
        );
    }
    Ok(parsed)
}

/// Formats accumulated suggestions as context for the next generation call.
///
/// One line per suggestion: `- [type] title (file § section)`.
#[must_use]
pub fn existing_suggestions_context(suggestions: &[Suggestion]) -> String {
    let mut out = String::new();
    for suggestion in suggestions {
        let _ = write!(
            out,
            "- [{}] {} ({}",
            suggestion.suggestion_type, suggestion.title, suggestion.target_file
        );
        if let Some(section) = &suggestion.target_section {
            let _ = write!(out, " § {section}");
        }
        out.push_str(")\n");
    }
    out
}
