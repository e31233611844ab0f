//! Heading-based section boundaries.

use regex::Regex;
use std::sync::LazyLock;

/// An ATX heading: one to six `#` followed by whitespace.
static HEADING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*?)\s*$").unwrap_or_else(|_| unreachable!()));

/// A heading line located in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    /// 0-based line index.
    pub index: usize,
    /// Number of `#` characters (1 to 6).
    pub level: usize,
    /// Heading text without the markers.
    pub text: String,
}

/// Line range of a section, heading included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRange {
    /// 0-based index of the heading line.
    pub start: usize,
    /// Exclusive end index, with trailing blank lines trimmed off.
    pub end: usize,
    /// Level of the section heading.
    pub level: usize,
}

impl SectionRange {
    /// Number of lines in the range.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the range is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Borrows the range out of a line list.
    #[must_use]
    pub fn slice<'a, S>(&self, lines: &'a [S]) -> &'a [S] {
        &lines[self.start..self.end]
    }
}

/// Heading level of a single line, ignoring fence context.
#[must_use]
pub fn heading_level(line: &str) -> Option<usize> {
    HEADING_PATTERN.captures(line).map(|caps| caps[1].len())
}

fn fence_marker(line: &str) -> Option<&'static str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// Heading level of every line, with fenced code treated as plain text.
#[must_use]
pub fn heading_levels<S: AsRef<str>>(lines: &[S]) -> Vec<Option<usize>> {
    let mut open_fence: Option<&'static str> = None;
    lines
        .iter()
        .map(|line| {
            let line = line.as_ref();
            if let Some(marker) = fence_marker(line) {
                match open_fence {
                    None => open_fence = Some(marker),
                    Some(open) if open == marker => open_fence = None,
                    Some(_) => {},
                }
                return None;
            }
            if open_fence.is_some() {
                None
            } else {
                heading_level(line)
            }
        })
        .collect()
}

/// All headings outside fenced code, in document order.
#[must_use]
pub fn headings<S: AsRef<str>>(lines: &[S]) -> Vec<Heading> {
    heading_levels(lines)
        .into_iter()
        .enumerate()
        .filter_map(|(index, level)| {
            let level = level?;
            let text = HEADING_PATTERN
                .captures(lines[index].as_ref())
                .map(|caps| caps[2].to_string())
                .unwrap_or_default();
            Some(Heading { index, level, text })
        })
        .collect()
}

/// Finds the first heading whose whole text equals `name`, ignoring case.
#[must_use]
pub fn find_heading<S: AsRef<str>>(lines: &[S], name: &str) -> Option<Heading> {
    let wanted = name.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    headings(lines)
        .into_iter()
        .find(|h| h.text.trim().to_lowercase() == wanted)
}

/// Index of the first heading after `heading` at its level or shallower,
/// or the line count when the section runs to the end of the document.
#[must_use]
pub fn find_section_end<S: AsRef<str>>(lines: &[S], heading: &Heading) -> usize {
    heading_levels(lines)
        .into_iter()
        .enumerate()
        .skip(heading.index + 1)
        .find(|(_, level)| level.is_some_and(|l| l <= heading.level))
        .map_or(lines.len(), |(index, _)| index)
}

/// Locates a named section and trims trailing blank lines from its range.
#[must_use]
pub fn extract_section<S: AsRef<str>>(lines: &[S], name: &str) -> Option<SectionRange> {
    let heading = find_heading(lines, name)?;
    let mut end = find_section_end(lines, &heading);
    while end > heading.index + 1 && lines[end - 1].as_ref().trim().is_empty() {
        end -= 1;
    }
    Some(SectionRange {
        start: heading.index,
        end,
        level: heading.level,
    })
}

/// Number of lines after which new content for `section` should be inserted.
///
/// Without a section, or when the section heading does not exist, this is
/// the end of the document. Otherwise it is the end of the section, walked
/// back over blank lines but never above the line after the heading.
#[must_use]
pub fn find_insertion_point<S: AsRef<str>>(lines: &[S], section: Option<&str>) -> usize {
    let Some(heading) = section.and_then(|name| find_heading(lines, name)) else {
        return lines.len();
    };
    let mut end = find_section_end(lines, &heading);
    while end > heading.index + 1 && lines[end - 1].as_ref().trim().is_empty() {
        end -= 1;
    }
    end
}

/// Renormalizes the headings of an extracted section.
///
/// The first heading becomes level 1 and every later heading is shifted by
/// the same amount, never going below level 1.
#[must_use]
pub fn shift_headings<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let levels = heading_levels(lines);
    let Some(base) = levels.iter().flatten().next().copied() else {
        return lines.iter().map(|l| l.as_ref().to_string()).collect();
    };
    let delta = base.saturating_sub(1);

    lines
        .iter()
        .zip(levels)
        .map(|(line, level)| {
            let line = line.as_ref();
            level.map_or_else(
                || line.to_string(),
                |level| {
                    let shifted = level.saturating_sub(delta).max(1);
                    format!("{}{}", "#".repeat(shifted), &line[level..])
                },
            )
        })
        .collect()
}
