//! Token-set similarity between suggestions.

use super::config::DedupConfig;
use crate::models::Suggestion;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

static TITLE_STRIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\s]").unwrap_or_else(|_| unreachable!()));

/// Keeps Latin-1 Supplement and Latin Extended-A/B letters.
static CONTENT_STRIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-z0-9\s\u{00C0}-\u{024F}]").unwrap_or_else(|_| unreachable!())
});

static HEADING_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*#{1,6}\s+").unwrap_or_else(|_| unreachable!()));

/// Why two suggestions were judged to overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityReason {
    /// Same file and section with overlapping titles.
    SameTarget,
    /// They cite a common insight.
    SharedInsight,
    /// Titles overlap strongly regardless of target.
    Title,
    /// Added text overlaps regardless of target.
    Content,
}

impl SimilarityReason {
    /// Returns the reason as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SameTarget => "same_target",
            Self::SharedInsight => "shared_insight",
            Self::Title => "title",
            Self::Content => "content",
        }
    }
}

impl fmt::Display for SimilarityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn tokens(cleaned: &str) -> HashSet<String> {
    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() > 2)
        .map(String::from)
        .collect()
}

/// Title words: lowercase alphanumerics, tokens longer than two characters.
#[must_use]
pub fn title_tokens(title: &str) -> HashSet<String> {
    tokens(&TITLE_STRIP.replace_all(&title.to_lowercase(), ""))
}

/// Content words: like titles, minus heading markers, keeping accented letters.
#[must_use]
pub fn content_tokens(content: &str) -> HashSet<String> {
    let without_headings = HEADING_MARKER.replace_all(content, "");
    tokens(&CONTENT_STRIP.replace_all(&without_headings.to_lowercase(), ""))
}

/// Intersection over union, 0 when either set is empty.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}

fn same_section(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    }
}

/// Returns the first rule under which `a` and `b` are similar.
#[must_use]
pub fn similarity_reason(
    a: &Suggestion,
    b: &Suggestion,
    config: &DedupConfig,
) -> Option<SimilarityReason> {
    let title_overlap = jaccard(&title_tokens(&a.title), &title_tokens(&b.title));

    if a.target_file == b.target_file
        && same_section(a.target_section.as_deref(), b.target_section.as_deref())
        && title_overlap > config.same_target_title_threshold
    {
        return Some(SimilarityReason::SameTarget);
    }

    if a
        .source_insight_ids
        .iter()
        .any(|id| b.source_insight_ids.contains(id))
    {
        return Some(SimilarityReason::SharedInsight);
    }

    if title_overlap > config.title_threshold {
        return Some(SimilarityReason::Title);
    }

    let content_overlap = jaccard(
        &content_tokens(&a.added_text()),
        &content_tokens(&b.added_text()),
    );
    if content_overlap > config.content_threshold {
        return Some(SimilarityReason::Content);
    }

    None
}

/// Whether two suggestions propose the same edit.
#[must_use]
pub fn is_similar(a: &Suggestion, b: &Suggestion, config: &DedupConfig) -> bool {
    similarity_reason(a, b, config).is_some()
}
