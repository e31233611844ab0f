//! Suggestion and diff types.
//!
//! [`LlmSuggestion`] is the untrusted shape an LLM returns. It only exists
//! after passing through [`LlmSuggestion::from_value`], which whitelists the
//! enums and coerces loosely typed content. [`Suggestion`] is the validated,
//! addressable edit unit built from it by the diff builder.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Kind of edit a suggestion performs.
///
/// Both the diff builder and the applier match on this exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    /// Insert new rule text.
    #[default]
    Add,
    /// Replace a section or passage.
    Update,
    /// Delete a passage.
    Remove,
    /// Remove several scattered passages and insert one merged passage.
    Consolidate,
    /// Move a section into its own file.
    Split,
}

impl SuggestionType {
    /// Parses a type string, falling back to `Add` for anything unknown.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "update" => Self::Update,
            "remove" => Self::Remove,
            "consolidate" => Self::Consolidate,
            "split" => Self::Split,
            _ => Self::Add,
        }
    }

    /// Returns the type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::Consolidate => "consolidate",
            Self::Split => "split",
        }
    }

    /// Returns all suggestion types.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Add,
            Self::Update,
            Self::Remove,
            Self::Consolidate,
            Self::Split,
        ]
    }
}

impl fmt::Display for SuggestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Suggestion priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Should be applied first.
    High,
    /// Default priority.
    #[default]
    Medium,
    /// Nice to have.
    Low,
}

impl Priority {
    /// Parses a priority string, falling back to `Medium` for anything unknown.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }

    /// Returns the priority as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Severity rank; lower sorts first (`high` = 0).
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }

    /// Confidence assumed when the LLM supplies none.
    #[must_use]
    pub const fn default_confidence(&self) -> f32 {
        match self {
            Self::High => 0.9,
            Self::Medium => 0.7,
            Self::Low => 0.5,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Review state of a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    /// Awaiting review.
    #[default]
    Pending,
    /// Approved, not yet written.
    Accepted,
    /// Declined by the reviewer.
    Rejected,
    /// Written to disk.
    Applied,
}

impl SuggestionStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Applied => "applied",
        }
    }
}

impl fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structural kind of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Pure insertion.
    Add,
    /// Removal followed by insertion.
    Replace,
    /// Pure removal.
    Remove,
}

/// One line of a diff.
///
/// `line_number` is 1-based and only set when the line was matched against
/// real file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffLine {
    /// 1-based line number in the file, if matched.
    pub line_number: Option<usize>,
    /// Line text.
    pub content: String,
}

impl DiffLine {
    /// Creates a synthesized line with no file position.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            line_number: None,
            content: content.into(),
        }
    }

    /// Creates a line matched at a 1-based file position.
    #[must_use]
    pub fn at(line_number: usize, content: impl Into<String>) -> Self {
        Self {
            line_number: Some(line_number),
            content: content.into(),
        }
    }

    /// Splits text into synthesized lines.
    #[must_use]
    pub fn from_text(text: &str) -> Vec<Self> {
        text.lines().map(Self::new).collect()
    }

    /// Joins line contents with newlines.
    #[must_use]
    pub fn join(lines: &[Self]) -> String {
        lines
            .iter()
            .map(|l| l.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Line-level description of an edit.
///
/// Either the flat `removed_lines`/`added_lines` carry content, or `parts`
/// does (multi-step `consolidate` and `split` edits), never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionDiff {
    /// Structural kind.
    #[serde(rename = "type")]
    pub diff_type: DiffType,
    /// Insert after this many lines (0 = top of file, `None` = new file).
    #[serde(default)]
    pub after_line: Option<usize>,
    /// Section the edit is scoped to.
    #[serde(default)]
    pub in_section: Option<String>,
    /// Lines taken out.
    #[serde(default)]
    pub removed_lines: Option<Vec<DiffLine>>,
    /// Lines put in.
    #[serde(default)]
    pub added_lines: Option<Vec<DiffLine>>,
    /// Ordered sub-steps for multi-step edits.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<SuggestionDiff>,
    /// Set when an intended replacement fell back to appending.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded_to_append: bool,
}

impl SuggestionDiff {
    /// Creates an insertion diff.
    #[must_use]
    pub const fn add(
        added: Vec<DiffLine>,
        after_line: Option<usize>,
        in_section: Option<String>,
    ) -> Self {
        Self {
            diff_type: DiffType::Add,
            after_line,
            in_section,
            removed_lines: None,
            added_lines: Some(added),
            parts: Vec::new(),
            degraded_to_append: false,
        }
    }

    /// Creates a replacement diff.
    #[must_use]
    pub const fn replace(
        removed: Vec<DiffLine>,
        added: Vec<DiffLine>,
        in_section: Option<String>,
    ) -> Self {
        Self {
            diff_type: DiffType::Replace,
            after_line: None,
            in_section,
            removed_lines: Some(removed),
            added_lines: Some(added),
            parts: Vec::new(),
            degraded_to_append: false,
        }
    }

    /// Creates a removal diff.
    #[must_use]
    pub const fn remove(removed: Vec<DiffLine>, in_section: Option<String>) -> Self {
        Self {
            diff_type: DiffType::Remove,
            after_line: None,
            in_section,
            removed_lines: Some(removed),
            added_lines: None,
            parts: Vec::new(),
            degraded_to_append: false,
        }
    }

    /// Creates a multi-step diff whose content lives entirely in `parts`.
    #[must_use]
    pub const fn composite(
        diff_type: DiffType,
        in_section: Option<String>,
        parts: Vec<Self>,
    ) -> Self {
        Self {
            diff_type,
            after_line: None,
            in_section,
            removed_lines: None,
            added_lines: None,
            parts,
            degraded_to_append: false,
        }
    }

    /// Marks the diff as a degraded append.
    #[must_use]
    pub const fn degraded(mut self) -> Self {
        self.degraded_to_append = true;
        self
    }

    /// Joined removed text of the flat lines, if any.
    #[must_use]
    pub fn removed_text(&self) -> Option<String> {
        self.removed_lines
            .as_deref()
            .filter(|lines| !lines.is_empty())
            .map(DiffLine::join)
    }

    /// Joined added text of the flat lines, if any.
    #[must_use]
    pub fn added_text(&self) -> Option<String> {
        self.added_lines
            .as_deref()
            .filter(|lines| !lines.is_empty())
            .map(DiffLine::join)
    }

    /// The last part carrying added lines.
    #[must_use]
    pub fn add_part(&self) -> Option<&Self> {
        self.parts.iter().rev().find(|p| p.added_text().is_some())
    }

    /// All added text, flat or across parts, joined with newlines.
    #[must_use]
    pub fn all_added_text(&self) -> String {
        let mut chunks: Vec<String> = self.added_text().into_iter().collect();
        chunks.extend(self.parts.iter().filter_map(Self::added_text));
        chunks.join("\n")
    }
}

/// Validated, addressable edit unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    /// Generated identifier.
    pub id: String,
    /// Edit kind.
    #[serde(rename = "type")]
    pub suggestion_type: SuggestionType,
    /// Priority.
    pub priority: Priority,
    /// Confidence (0.0 to 1.0).
    pub confidence: f32,
    /// Short human title.
    pub title: String,
    /// Why the edit is proposed.
    pub rationale: String,
    /// Target file relative to the project root.
    pub target_file: String,
    /// Target section name.
    #[serde(default)]
    pub target_section: Option<String>,
    /// Line-level edit.
    pub diff: SuggestionDiff,
    /// Insights that motivated the edit.
    #[serde(default)]
    pub source_insight_ids: Vec<String>,
    /// Sessions those insights came from.
    #[serde(default)]
    pub source_session_ids: Vec<String>,
    /// Destination path for `split`.
    #[serde(default)]
    pub split_target: Option<String>,
    /// Review state.
    #[serde(default)]
    pub status: SuggestionStatus,
}

impl Suggestion {
    /// Generates a fresh suggestion id.
    #[must_use]
    pub fn generate_id() -> String {
        format!("sug_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
    }

    /// All text this suggestion would add, used for content similarity.
    #[must_use]
    pub fn added_text(&self) -> String {
        self.diff.all_added_text()
    }
}

/// Loosely typed content block of a raw suggestion, coerced to string lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionContent {
    /// Text to add (each entry may span lines).
    #[serde(default)]
    pub add: Vec<String>,
    /// Text to remove (each entry may span lines).
    #[serde(default)]
    pub remove: Vec<String>,
}

impl SuggestionContent {
    /// All add entries joined with newlines.
    #[must_use]
    pub fn add_text(&self) -> String {
        self.add.join("\n")
    }

    /// All remove entries joined with newlines.
    #[must_use]
    pub fn remove_text(&self) -> String {
        self.remove.join("\n")
    }
}

/// Normalized edit proposal as returned by the LLM.
///
/// Deserializing always goes through [`LlmSuggestion::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Value")]
pub struct LlmSuggestion {
    /// Edit kind (whitelisted, defaults to `add`).
    #[serde(rename = "type")]
    pub suggestion_type: SuggestionType,
    /// Target file path.
    pub target_file: String,
    /// Target section name.
    pub target_section: Option<String>,
    /// Short title.
    pub title: String,
    /// Rationale.
    pub rationale: String,
    /// Priority (whitelisted, defaults to `medium`).
    pub priority: Priority,
    /// Confidence clamped to 0.0..=1.0, if the LLM gave a number.
    pub confidence: Option<f32>,
    /// Coerced content.
    pub content: SuggestionContent,
    /// Insights the LLM cited.
    pub source_insight_ids: Vec<String>,
    /// Whether the LLM declined to propose an edit.
    pub skipped: bool,
    /// Why it declined.
    pub skip_reason: Option<String>,
}

impl LlmSuggestion {
    /// Normalizes one untrusted JSON value.
    ///
    /// Returns `None` for non-objects and objects without a target file.
    /// Unknown `type`/`priority` strings become `add`/`medium`; content given
    /// as a string or as an array of strings is coerced to a list.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let target_file = str_field(obj, &["targetFile", "target_file", "file"])?;
        if target_file.is_empty() {
            return None;
        }

        let suggestion_type = str_field(obj, &["type"])
            .map_or(SuggestionType::Add, |s| SuggestionType::parse(&s));
        let priority = str_field(obj, &["priority"]).map_or(Priority::Medium, |s| Priority::parse(&s));

        #[allow(clippy::cast_possible_truncation)]
        let confidence = obj
            .get("confidence")
            .and_then(Value::as_f64)
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0) as f32);

        let content = match obj.get("content") {
            Some(Value::Object(block)) => SuggestionContent {
                add: coerce_strings(block.get("add")),
                remove: coerce_strings(block.get("remove")),
            },
            Some(other @ (Value::String(_) | Value::Array(_))) => SuggestionContent {
                add: coerce_strings(Some(other)),
                remove: Vec::new(),
            },
            _ => SuggestionContent::default(),
        };

        let source_insight_ids = ["sourceInsightIds", "source_insight_ids", "insightIds"]
            .iter()
            .find_map(|key| obj.get(*key))
            .map(|v| coerce_strings(Some(v)))
            .unwrap_or_default();

        Some(Self {
            suggestion_type,
            target_file,
            target_section: str_field(obj, &["targetSection", "target_section", "section"])
                .filter(|s| !s.is_empty()),
            title: str_field(obj, &["title"]).unwrap_or_default(),
            rationale: str_field(obj, &["rationale", "reason"]).unwrap_or_default(),
            priority,
            confidence,
            content,
            source_insight_ids,
            skipped: obj.get("skipped").and_then(Value::as_bool).unwrap_or(false),
            skip_reason: str_field(obj, &["skipReason", "skip_reason"]).filter(|s| !s.is_empty()),
        })
    }
}

impl TryFrom<Value> for LlmSuggestion {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(&value).ok_or_else(|| "not a usable suggestion object".to_string())
    }
}

/// First string value among `keys`, trimmed.
fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
}

/// Coerces a string, array of strings, or scalar into a list of non-empty strings.
fn coerce_strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::Number(n)) => vec![n.to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_and_priority_whitelist() {
        assert_eq!(SuggestionType::parse("UPDATE"), SuggestionType::Update);
        assert_eq!(SuggestionType::parse("rewrite"), SuggestionType::Add);
        assert_eq!(Priority::parse(" High "), Priority::High);
        assert_eq!(Priority::parse("urgent"), Priority::Medium);
    }

    #[test]
    fn test_from_value_coerces_content() {
        let raw = json!({
            "type": "consolidate",
            "targetFile": "CLAUDE.md",
            "targetSection": "Testing",
            "title": "Merge test rules",
            "priority": "high",
            "confidence": 3.5,
            "content": {
                "add": "- Run tests with vitest",
                "remove": ["- Use jest", "", "- Run npm test"]
            },
            "sourceInsightIds": ["ins_1", "ins_2"]
        });

        let parsed = LlmSuggestion::from_value(&raw).unwrap();
        assert_eq!(parsed.suggestion_type, SuggestionType::Consolidate);
        assert_eq!(parsed.priority, Priority::High);
        assert_eq!(parsed.confidence, Some(1.0));
        assert_eq!(parsed.content.add, vec!["- Run tests with vitest"]);
        assert_eq!(parsed.content.remove, vec!["- Use jest", "- Run npm test"]);
        assert_eq!(parsed.source_insight_ids.len(), 2);
        assert!(!parsed.skipped);
    }

    #[test]
    fn test_from_value_rejects_unusable_shapes() {
        assert!(LlmSuggestion::from_value(&json!("add a rule")).is_none());
        assert!(LlmSuggestion::from_value(&json!({"type": "add"})).is_none());
        assert!(LlmSuggestion::from_value(&json!({"targetFile": "  "})).is_none());
    }

    #[test]
    fn test_from_value_defaults() {
        let parsed = LlmSuggestion::from_value(&json!({
            "type": 42,
            "target_file": "CLAUDE.md",
            "priority": null,
            "content": {"add": 7}
        }))
        .unwrap();
        assert_eq!(parsed.suggestion_type, SuggestionType::Add);
        assert_eq!(parsed.priority, Priority::Medium);
        assert_eq!(parsed.confidence, None);
        assert_eq!(parsed.content.add, vec!["7"]);
        assert!(parsed.target_section.is_none());
    }

    #[test]
    fn test_deserialize_goes_through_normalization() {
        let parsed: LlmSuggestion = serde_json::from_value(json!({
            "type": "nonsense",
            "targetFile": "CLAUDE.md",
            "content": {"add": ["- a"]},
            "skipped": true,
            "skipReason": "already covered"
        }))
        .unwrap();
        assert_eq!(parsed.suggestion_type, SuggestionType::Add);
        assert!(parsed.skipped);
        assert_eq!(parsed.skip_reason.as_deref(), Some("already covered"));

        let roundtrip: LlmSuggestion =
            serde_json::from_value(serde_json::to_value(&parsed).unwrap()).unwrap();
        assert_eq!(roundtrip, parsed);
    }

    #[test]
    fn test_all_added_text_spans_parts() {
        let diff = SuggestionDiff::composite(
            DiffType::Replace,
            None,
            vec![
                SuggestionDiff::remove(vec![DiffLine::at(3, "- old")], None),
                SuggestionDiff::add(vec![DiffLine::new("- merged")], Some(4), None),
            ],
        );
        assert_eq!(diff.all_added_text(), "- merged");
        assert_eq!(
            diff.add_part().and_then(SuggestionDiff::added_text).as_deref(),
            Some("- merged")
        );
        assert!(diff.removed_text().is_none());
    }

    #[test]
    fn test_generate_id_shape() {
        let id = Suggestion::generate_id();
        assert!(id.starts_with("sug_"));
        assert_eq!(id.len(), 16);
    }
}
