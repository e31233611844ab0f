//! Maps raw edit proposals onto line-level diffs of real rule files.
//!
//! The builder is pure: it reads only the [`RulesSnapshot`] it is given. The
//! applier later re-reads the live file, so line numbers recorded here are
//! informational and every edit is re-located at apply time.

use crate::markdown::{self, extract_section, find_insertion_point, find_text_in_file};
use crate::models::{
    DiffLine, LlmSuggestion, RulesFile, RulesSnapshot, Suggestion, SuggestionDiff,
    SuggestionStatus, SuggestionType,
};
use std::collections::HashMap;
use tracing::debug;

/// Builds the diff for a raw suggestion.
///
/// Returns `None` when the proposal carries no usable content, for example
/// an `add` with nothing to add or a `split` without a destination.
///
/// # Arguments
///
/// * `raw` - Normalized LLM proposal
/// * `snapshot` - Rules snapshot used for section lookup
/// * `target_file` - Relative path of the file to edit
/// * `target_section` - Section the edit is scoped to
#[must_use]
pub fn build_diff(
    raw: &LlmSuggestion,
    snapshot: &RulesSnapshot,
    target_file: &str,
    target_section: Option<&str>,
) -> Option<SuggestionDiff> {
    let file = snapshot.find_file(target_file);
    let section = target_section.map(str::trim).filter(|s| !s.is_empty());

    match raw.suggestion_type {
        SuggestionType::Add => build_add(raw, file, section),
        SuggestionType::Update => build_update(raw, file, section),
        SuggestionType::Remove => build_remove(raw, file, section),
        SuggestionType::Consolidate => build_consolidate(raw, file, section),
        SuggestionType::Split => build_split(raw, snapshot, file, section),
    }
}

fn added_lines(raw: &LlmSuggestion) -> Option<Vec<DiffLine>> {
    let text = raw.content.add_text();
    let trimmed = text.trim_matches('\n');
    if trimmed.trim().is_empty() {
        return None;
    }
    Some(DiffLine::from_text(trimmed))
}

fn section_lines(file: &RulesFile, section: &str) -> Option<Vec<DiffLine>> {
    let lines = file.lines();
    let range = extract_section(&lines, section)?;
    Some(
        range
            .slice(&lines)
            .iter()
            .enumerate()
            .map(|(offset, line)| DiffLine::at(range.start + offset + 1, *line))
            .collect(),
    )
}

/// Located lines for `text`, or its non-blank lines without positions.
fn located_or_raw(file: Option<&RulesFile>, text: &str) -> Vec<DiffLine> {
    file.and_then(|f| find_text_in_file(&f.content, text))
        .unwrap_or_else(|| {
            text.lines()
                .filter(|l| !l.trim().is_empty())
                .map(DiffLine::new)
                .collect()
        })
}

fn insertion_point(file: Option<&RulesFile>, section: Option<&str>) -> Option<usize> {
    file.map(|f| find_insertion_point(&f.lines(), section))
}

fn build_add(
    raw: &LlmSuggestion,
    file: Option<&RulesFile>,
    section: Option<&str>,
) -> Option<SuggestionDiff> {
    let added = added_lines(raw)?;
    Some(SuggestionDiff::add(
        added,
        insertion_point(file, section),
        section.map(String::from),
    ))
}

fn build_update(
    raw: &LlmSuggestion,
    file: Option<&RulesFile>,
    section: Option<&str>,
) -> Option<SuggestionDiff> {
    let mut added = added_lines(raw)?;
    let in_section = section.map(String::from);

    let Some(file) = file else {
        return Some(SuggestionDiff::add(added, None, in_section).degraded());
    };

    // The file's real section content beats whatever the LLM claimed to remove.
    if let Some(removed) = section.and_then(|s| section_lines(file, s)) {
        let starts_with_heading = added
            .iter()
            .find(|l| !l.content.trim().is_empty())
            .is_some_and(|l| markdown::heading_level(&l.content).is_some());
        if !starts_with_heading {
            if let Some(heading) = removed.first() {
                added.insert(0, DiffLine::new(heading.content.clone()));
            }
        }
        return Some(SuggestionDiff::replace(removed, added, in_section));
    }

    let remove_text = raw.content.remove_text();
    if !remove_text.trim().is_empty() {
        let removed = located_or_raw(Some(file), &remove_text);
        return Some(SuggestionDiff::replace(removed, added, in_section));
    }

    debug!(
        target_file = %file.relative_path,
        "update has no locatable section or remove text, degrading to append"
    );
    Some(SuggestionDiff::add(added, Some(file.line_count()), in_section).degraded())
}

fn build_remove(
    raw: &LlmSuggestion,
    file: Option<&RulesFile>,
    section: Option<&str>,
) -> Option<SuggestionDiff> {
    let file = file?;
    let remove_text = raw.content.remove_text();
    if remove_text.trim().is_empty() {
        return None;
    }
    let removed = located_or_raw(Some(file), &remove_text);
    Some(SuggestionDiff::remove(removed, section.map(String::from)))
}

fn build_consolidate(
    raw: &LlmSuggestion,
    file: Option<&RulesFile>,
    section: Option<&str>,
) -> Option<SuggestionDiff> {
    let added = added_lines(raw)?;
    let mut parts: Vec<SuggestionDiff> = raw
        .content
        .remove
        .iter()
        .filter(|text| !text.trim().is_empty())
        .map(|text| SuggestionDiff::remove(located_or_raw(file, text), section.map(String::from)))
        .collect();
    parts.push(SuggestionDiff::add(
        added,
        insertion_point(file, section),
        section.map(String::from),
    ));
    Some(SuggestionDiff::composite(
        crate::models::DiffType::Replace,
        section.map(String::from),
        parts,
    ))
}

fn build_split(
    raw: &LlmSuggestion,
    snapshot: &RulesSnapshot,
    file: Option<&RulesFile>,
    section: Option<&str>,
) -> Option<SuggestionDiff> {
    let section = section?;
    split_destination(raw)?;
    let file = file?;
    let removed = section_lines(file, section)?;

    let moved = snapshot.rules_in_section(section);
    let summary = vec![
        DiffLine::new(format!("# {section}")),
        DiffLine::new(format!("({moved} rules moved)")),
    ];
    Some(SuggestionDiff::composite(
        crate::models::DiffType::Replace,
        Some(section.to_string()),
        vec![
            SuggestionDiff::remove(removed, Some(section.to_string())),
            SuggestionDiff::add(summary, None, None),
        ],
    ))
}

/// Destination path of a split: the first non-blank `content.add` line.
fn split_destination(raw: &LlmSuggestion) -> Option<String> {
    raw.content
        .add
        .iter()
        .flat_map(|entry| entry.lines())
        .map(|line| line.trim().trim_matches('`').trim())
        .find(|line| !line.is_empty())
        .map(String::from)
}

/// Builds a validated suggestion from a raw proposal.
///
/// Returns `None` for skipped proposals and proposals without a usable diff.
/// Confidence falls back to the priority default when the LLM gave none.
///
/// # Arguments
///
/// * `raw` - Normalized LLM proposal
/// * `snapshot` - Rules snapshot used for section lookup
/// * `insight_sessions` - Maps insight ids to the sessions they came from
#[must_use]
pub fn build_suggestion(
    raw: &LlmSuggestion,
    snapshot: &RulesSnapshot,
    insight_sessions: &HashMap<String, Vec<String>>,
) -> Option<Suggestion> {
    if raw.skipped {
        debug!(
            target_file = %raw.target_file,
            reason = raw.skip_reason.as_deref().unwrap_or(""),
            "suggestion skipped by model"
        );
        return None;
    }

    let diff = build_diff(
        raw,
        snapshot,
        &raw.target_file,
        raw.target_section.as_deref(),
    )?;

    let mut source_session_ids: Vec<String> = Vec::new();
    for insight_id in &raw.source_insight_ids {
        for session_id in insight_sessions.get(insight_id).into_iter().flatten() {
            if !source_session_ids.contains(session_id) {
                source_session_ids.push(session_id.clone());
            }
        }
    }

    let title = if raw.title.is_empty() {
        format!("{} {}", raw.suggestion_type, raw.target_file)
    } else {
        raw.title.clone()
    };

    Some(Suggestion {
        id: Suggestion::generate_id(),
        suggestion_type: raw.suggestion_type,
        priority: raw.priority,
        confidence: raw
            .confidence
            .map_or_else(|| raw.priority.default_confidence(), |c| c.clamp(0.0, 1.0)),
        title,
        rationale: raw.rationale.clone(),
        target_file: raw.target_file.clone(),
        target_section: raw.target_section.clone(),
        diff,
        source_insight_ids: raw.source_insight_ids.clone(),
        source_session_ids,
        split_target: match raw.suggestion_type {
            SuggestionType::Split => split_destination(raw),
            _ => None,
        },
        status: SuggestionStatus::Pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiffType, Priority, RulesScope, SuggestionContent};
    use std::path::PathBuf;

    const CLAUDE_MD: &str = "# Project\n\n## Architecture\n- Hexagonal layout\n\n## Testing\n- Use jest\n- Run npm test\n\n### Fixtures\n- Keep fixtures small\n\n## Deployment\n- Deploy with fly\n";

    fn snapshot() -> RulesSnapshot {
        RulesSnapshot::new(
            "/project",
            vec![RulesFile {
                path: PathBuf::from("/project/CLAUDE.md"),
                scope: RulesScope::Project,
                relative_path: "CLAUDE.md".to_string(),
                content: CLAUDE_MD.to_string(),
                rules: Vec::new(),
                last_modified: 0,
                size: CLAUDE_MD.len() as u64,
            }],
        )
    }

    fn raw(suggestion_type: SuggestionType, add: &[&str], remove: &[&str]) -> LlmSuggestion {
        LlmSuggestion {
            suggestion_type,
            target_file: "CLAUDE.md".to_string(),
            target_section: None,
            title: "Test rule".to_string(),
            rationale: String::new(),
            priority: Priority::Medium,
            confidence: None,
            content: SuggestionContent {
                add: add.iter().map(ToString::to_string).collect(),
                remove: remove.iter().map(ToString::to_string).collect(),
            },
            source_insight_ids: Vec::new(),
            skipped: false,
            skip_reason: None,
        }
    }

    #[test]
    fn test_add_to_section_uses_insertion_point() {
        let diff = build_diff(
            &raw(SuggestionType::Add, &["- Use vitest"], &[]),
            &snapshot(),
            "CLAUDE.md",
            Some("Testing"),
        )
        .unwrap();
        assert_eq!(diff.diff_type, DiffType::Add);
        assert_eq!(diff.after_line, Some(11));
        assert_eq!(diff.in_section.as_deref(), Some("Testing"));
        assert_eq!(diff.added_lines.unwrap()[0].line_number, None);
    }

    #[test]
    fn test_add_to_unknown_file_has_no_anchor() {
        let diff = build_diff(
            &raw(SuggestionType::Add, &["- a"], &[]),
            &snapshot(),
            "docs/CLAUDE.md",
            None,
        )
        .unwrap();
        assert_eq!(diff.after_line, None);
    }

    #[test]
    fn test_add_without_content_is_none() {
        assert!(
            build_diff(&raw(SuggestionType::Add, &[], &[]), &snapshot(), "CLAUDE.md", None)
                .is_none()
        );
    }

    #[test]
    fn test_update_reads_real_section_and_keeps_heading() {
        let diff = build_diff(
            &raw(SuggestionType::Update, &["- Run tests with vitest"], &["- hallucinated"]),
            &snapshot(),
            "CLAUDE.md",
            Some("testing"),
        )
        .unwrap();
        assert_eq!(diff.diff_type, DiffType::Replace);
        let removed = diff.removed_lines.unwrap();
        assert_eq!(removed.first().unwrap(), &DiffLine::at(6, "## Testing"));
        assert_eq!(removed.last().unwrap(), &DiffLine::at(11, "- Keep fixtures small"));
        assert_eq!(
            DiffLine::join(&diff.added_lines.unwrap()),
            "## Testing\n- Run tests with vitest"
        );
    }

    #[test]
    fn test_update_falls_back_to_remove_text() {
        let diff = build_diff(
            &raw(SuggestionType::Update, &["- Deploy with render"], &["deploy with fly"]),
            &snapshot(),
            "CLAUDE.md",
            Some("Nope"),
        )
        .unwrap();
        assert_eq!(
            diff.removed_lines.unwrap(),
            vec![DiffLine::at(14, "- Deploy with fly")]
        );
        assert!(!diff.degraded_to_append);
    }

    #[test]
    fn test_update_degrades_to_flagged_append() {
        let diff = build_diff(
            &raw(SuggestionType::Update, &["- New"], &[]),
            &snapshot(),
            "CLAUDE.md",
            None,
        )
        .unwrap();
        assert_eq!(diff.diff_type, DiffType::Add);
        assert_eq!(diff.after_line, Some(14));
        assert!(diff.degraded_to_append);
    }

    #[test]
    fn test_remove_unlocated_text_is_kept_without_numbers() {
        let diff = build_diff(
            &raw(SuggestionType::Remove, &[], &["- Not in file"]),
            &snapshot(),
            "CLAUDE.md",
            None,
        )
        .unwrap();
        assert_eq!(diff.removed_lines.unwrap(), vec![DiffLine::new("- Not in file")]);
        assert!(
            build_diff(&raw(SuggestionType::Remove, &[], &["- x"]), &snapshot(), "missing.md", None)
                .is_none()
        );
    }

    #[test]
    fn test_consolidate_builds_parts() {
        let diff = build_diff(
            &raw(
                SuggestionType::Consolidate,
                &["- Run tests with `npm test` under jest"],
                &["- Use jest", "- Run npm test"],
            ),
            &snapshot(),
            "CLAUDE.md",
            Some("Testing"),
        )
        .unwrap();
        assert_eq!(diff.diff_type, DiffType::Replace);
        assert!(diff.removed_lines.is_none() && diff.added_lines.is_none());
        assert_eq!(diff.parts.len(), 3);
        assert_eq!(diff.parts[0].removed_lines.as_ref().unwrap()[0].line_number, Some(7));
        assert_eq!(diff.parts[2].diff_type, DiffType::Add);
    }

    #[test]
    fn test_split_summarizes_section() {
        let snap = snapshot();
        let mut split = raw(SuggestionType::Split, &["docs/testing.md"], &[]);
        split.target_section = Some("Testing".to_string());
        let suggestion = build_suggestion(&split, &snap, &HashMap::new()).unwrap();
        assert_eq!(suggestion.split_target.as_deref(), Some("docs/testing.md"));

        let parts = &suggestion.diff.parts;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].removed_lines.as_ref().unwrap().len(), 6);
        assert_eq!(
            parts[1].added_text().as_deref(),
            Some("# Testing\n(0 rules moved)")
        );

        split.target_section = None;
        assert!(build_suggestion(&split, &snap, &HashMap::new()).is_none());
    }

    #[test]
    fn test_build_suggestion_maps_sessions_and_confidence() {
        let mut proposal = raw(SuggestionType::Add, &["- a"], &[]);
        proposal.priority = Priority::High;
        proposal.source_insight_ids = vec!["i1".to_string(), "i2".to_string()];
        let map = HashMap::from([
            ("i1".to_string(), vec!["s1".to_string()]),
            ("i2".to_string(), vec!["s1".to_string(), "s2".to_string()]),
        ]);
        let suggestion = build_suggestion(&proposal, &snapshot(), &map).unwrap();
        assert_eq!(suggestion.source_session_ids, vec!["s1", "s2"]);
        assert!((suggestion.confidence - 0.9).abs() < f32::EPSILON);
        assert_eq!(suggestion.status, SuggestionStatus::Pending);

        proposal.skipped = true;
        assert!(build_suggestion(&proposal, &snapshot(), &map).is_none());
    }
}
