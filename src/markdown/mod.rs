//! Line-oriented markdown helpers shared by the diff builder and the applier.
//!
//! Rule files are organized by ATX headings (`#` through `######`). A section
//! runs from its heading up to, but excluding, the next heading at the same
//! or a shallower level, so nested subsections always belong to their parent.
//! Lines inside fenced code blocks are never treated as headings.
//!
//! Two concerns live here:
//!
//! - [`section`]: heading detection, section boundaries, insertion points and
//!   heading-level renormalization
//! - [`locate`]: whitespace- and case-tolerant text location, plus the
//!   exact-then-fuzzy replace and remove primitives built on it

pub mod locate;
pub mod section;

pub use locate::{
    collapse_blank_lines, content_already_present, find_block, find_text_in_file, lines_match,
    normalize_line, remove_text, replace_text,
};
pub use section::{
    Heading, SectionRange, extract_section, find_heading, find_insertion_point,
    find_section_end, heading_level, heading_levels, headings, shift_headings,
};

/// Splits content into lines and reports whether it ended with a newline.
#[must_use]
pub fn split_lines(content: &str) -> (Vec<&str>, bool) {
    (content.lines().collect(), content.ends_with('\n'))
}

/// Joins lines with `\n`, optionally restoring a trailing newline.
#[must_use]
pub fn join_lines<S: AsRef<str>>(lines: &[S], trailing_newline: bool) -> String {
    let mut out = lines
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\n");
    if trailing_newline && !out.is_empty() {
        out.push('\n');
    }
    out
}
