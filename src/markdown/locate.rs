//! Tolerant text location and editing.
//!
//! LLM-proposed text rarely matches the file byte for byte. Lines are
//! compared after trimming, collapsing whitespace runs and lowercasing, and
//! a line also matches when one normalized form contains the other, so a
//! missing bullet marker does not defeat the match.

use super::{join_lines, split_lines};
use crate::models::DiffLine;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Three or more consecutive line breaks, allowing whitespace-only lines.
static EXCESS_BLANKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").unwrap_or_else(|_| unreachable!()));

/// Trims, collapses whitespace runs and lowercases a line.
#[must_use]
pub fn normalize_line(line: &str) -> String {
    line.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Compares two already-normalized lines.
#[must_use]
pub fn lines_match(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a == b || a.contains(b) || b.contains(a))
}

fn search_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(normalize_line)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Start index of the first contiguous run of `lines` matching `search`.
///
/// `search` must already be normalized and free of blank entries.
#[must_use]
pub fn find_block<S: AsRef<str>>(lines: &[S], search: &[String]) -> Option<usize> {
    if search.is_empty() || search.len() > lines.len() {
        return None;
    }
    let normalized: Vec<String> = lines.iter().map(|l| normalize_line(l.as_ref())).collect();
    (0..=normalized.len() - search.len()).find(|&start| {
        search
            .iter()
            .zip(&normalized[start..])
            .all(|(wanted, actual)| lines_match(actual, wanted))
    })
}

/// Locates `search_text` in `content`, returning the matched file lines with
/// their 1-based line numbers.
///
/// A contiguous block match wins. Otherwise each search line is located
/// independently and whichever lines were found are returned. `None` means
/// nothing matched at all.
#[must_use]
pub fn find_text_in_file(content: &str, search_text: &str) -> Option<Vec<DiffLine>> {
    let search = search_lines(search_text);
    if search.is_empty() {
        return None;
    }
    let (lines, _) = split_lines(content);

    if let Some(start) = find_block(&lines, &search) {
        return Some(
            lines[start..start + search.len()]
                .iter()
                .enumerate()
                .map(|(offset, line)| DiffLine::at(start + offset + 1, *line))
                .collect(),
        );
    }

    let normalized: Vec<String> = lines.iter().map(|l| normalize_line(l)).collect();
    let mut used = HashSet::new();
    let found: Vec<DiffLine> = search
        .iter()
        .filter_map(|wanted| {
            let index = (0..normalized.len())
                .find(|&i| !used.contains(&i) && lines_match(&normalized[i], wanted))?;
            used.insert(index);
            Some(DiffLine::at(index + 1, lines[index]))
        })
        .collect();

    if found.is_empty() { None } else { Some(found) }
}

/// Replaces the first occurrence of `old` with `new`.
///
/// Tries an exact substring match, then a fuzzy contiguous line-block match.
/// Returns `None` when neither finds the text.
#[must_use]
pub fn replace_text(content: &str, old: &str, new: &str) -> Option<String> {
    if old.trim().is_empty() {
        return None;
    }
    if content.contains(old) {
        return Some(content.replacen(old, new, 1));
    }

    let search = search_lines(old);
    let (lines, trailing) = split_lines(content);
    let start = find_block(&lines, &search)?;
    let mut edited: Vec<&str> = lines[..start].to_vec();
    edited.extend(new.lines());
    edited.extend_from_slice(&lines[start + search.len()..]);
    Some(join_lines(&edited, trailing))
}

/// Removes the first occurrence of `old`.
///
/// Tries an exact match (whole line first), then a fuzzy contiguous block,
/// then individually located lines when every line of `old` can be found.
/// Returns `None` when the text cannot be located.
#[must_use]
pub fn remove_text(content: &str, old: &str) -> Option<String> {
    if old.trim().is_empty() {
        return None;
    }
    let with_newline = format!("{old}\n");
    if content.contains(&with_newline) {
        return Some(content.replacen(&with_newline, "", 1));
    }
    if content.contains(old) {
        return Some(content.replacen(old, "", 1));
    }

    let search = search_lines(old);
    let (lines, trailing) = split_lines(content);
    let drop: HashSet<usize> = if let Some(start) = find_block(&lines, &search) {
        (start..start + search.len()).collect()
    } else {
        let located = find_text_in_file(content, old)?;
        if located.len() < search.len() {
            return None;
        }
        located
            .iter()
            .filter_map(|line| line.line_number.map(|n| n - 1))
            .collect()
    };

    let kept: Vec<&str> = lines
        .iter()
        .enumerate()
        .filter(|(i, _)| !drop.contains(i))
        .map(|(_, line)| *line)
        .collect();
    Some(join_lines(&kept, trailing))
}

/// Collapses runs of blank lines down to a single blank line.
#[must_use]
pub fn collapse_blank_lines(content: &str) -> String {
    EXCESS_BLANKS.replace_all(content, "\n\n").into_owned()
}

/// Whether more than `threshold` of the meaningful lines of `new_content`
/// already exist somewhere in `existing`.
#[must_use]
pub fn content_already_present(existing: &str, new_content: &str, threshold: f32) -> bool {
    let wanted = search_lines(new_content);
    if wanted.is_empty() {
        return false;
    }
    let present: HashSet<String> = search_lines(existing).into_iter().collect();
    let hits = wanted.iter().filter(|line| present.contains(*line)).count();

    #[allow(clippy::cast_precision_loss)]
    let ratio = hits as f32 / wanted.len() as f32;
    ratio > threshold
}
