//! Rule file types.
//!
//! A [`RulesSnapshot`] is the read model of every rules document the diff
//! builder can target. It is built once per run and never mutated; the
//! applier always re-reads the live file, since the snapshot may be stale.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Where a rules file lives relative to the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulesScope {
    /// User-wide rules (`~/.claude/CLAUDE.md`).
    Global,
    /// Checked-in project rules (`CLAUDE.md`, `.claude/CLAUDE.md`, `.claude/rules/`).
    Project,
    /// Uncommitted personal project rules (`CLAUDE.local.md`).
    ProjectLocal,
    /// Rules nested in a subdirectory of the project.
    Subdirectory,
}

impl RulesScope {
    /// Returns the scope as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project => "project",
            Self::ProjectLocal => "project_local",
            Self::Subdirectory => "subdirectory",
        }
    }
}

impl fmt::Display for RulesScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Surface syntax a rule was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleFormat {
    /// `- rule`, `* rule` or `+ rule`.
    Bullet,
    /// `1. rule`.
    Numbered,
    /// Free-standing prose.
    Paragraph,
}

impl RuleFormat {
    /// Returns the format as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bullet => "bullet",
            Self::Numbered => "numbered",
            Self::Paragraph => "paragraph",
        }
    }
}

/// How strongly a rule is worded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEmphasis {
    /// Plain wording.
    #[default]
    Normal,
    /// Uppercase directives (`MUST`, `NEVER`, `ALWAYS`) or bold text.
    Strong,
    /// Explicit `IMPORTANT` / `CRITICAL` markers.
    Critical,
}

/// A single rule extracted from a rules file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Stable identifier (`<relative path>:<line_start>`).
    pub id: String,
    /// Rule text without list markers.
    pub text: String,
    /// Name of the nearest enclosing heading, if any.
    pub section: Option<String>,
    /// Heading names from the outermost to the owning section.
    pub hierarchy: Vec<String>,
    /// Relative path of the file the rule came from.
    pub source_file: String,
    /// Scope of the file the rule came from.
    pub source_scope: RulesScope,
    /// 1-based first line.
    pub line_start: usize,
    /// 1-based last line (inclusive).
    pub line_end: usize,
    /// Surface syntax.
    pub format: RuleFormat,
    /// Wording strength.
    pub emphasis: RuleEmphasis,
    /// `@path` imports referenced by the rule.
    pub imports: Vec<String>,
}

/// A parsed markdown rules document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesFile {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Scope tag.
    pub scope: RulesScope,
    /// Path relative to the project root (or `~/` form for global files).
    pub relative_path: String,
    /// Full file text at snapshot time.
    pub content: String,
    /// Extracted rules in document order.
    pub rules: Vec<Rule>,
    /// Last-modified time (Unix seconds).
    pub last_modified: u64,
    /// File size in bytes.
    pub size: u64,
}

impl RulesFile {
    /// Returns the file's lines as borrowed slices.
    #[must_use]
    pub fn lines(&self) -> Vec<&str> {
        self.content.lines().collect()
    }

    /// Returns the number of lines.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }

    /// Returns every `@import` referenced anywhere in the file.
    #[must_use]
    pub fn imports(&self) -> Vec<&str> {
        self.rules
            .iter()
            .flat_map(|rule| rule.imports.iter().map(String::as_str))
            .collect()
    }
}

/// Summary counts over a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesStats {
    /// Number of rules files.
    pub total_files: usize,
    /// Number of rules across all files.
    pub total_rules: usize,
    /// Rule count per scope.
    pub by_scope: BTreeMap<String, usize>,
    /// Rule count per format.
    pub by_format: BTreeMap<String, usize>,
    /// Number of `@import` references.
    pub import_count: usize,
    /// Whether a global rules file is present.
    pub has_global: bool,
    /// Whether a `CLAUDE.local.md` is present.
    pub has_local: bool,
    /// Whether `.claude/rules/` or subdirectory files are present.
    pub has_modular: bool,
}

/// Immutable aggregate of a project's rule files for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesSnapshot {
    /// Project root directory.
    pub project_root: PathBuf,
    /// Snapshot time (Unix seconds).
    pub timestamp: u64,
    /// Parsed files in discovery order.
    pub files: Vec<RulesFile>,
    /// Every rule across all files, in file order.
    pub all_rules: Vec<Rule>,
    /// Summary counts.
    pub stats: RulesStats,
}

impl RulesSnapshot {
    /// Builds a snapshot from parsed files, deriving the flattened rule list and stats.
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>, files: Vec<RulesFile>) -> Self {
        let all_rules: Vec<Rule> = files.iter().flat_map(|f| f.rules.clone()).collect();

        let mut stats = RulesStats {
            total_files: files.len(),
            total_rules: all_rules.len(),
            ..RulesStats::default()
        };
        for rule in &all_rules {
            *stats
                .by_scope
                .entry(rule.source_scope.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_format
                .entry(rule.format.as_str().to_string())
                .or_default() += 1;
            stats.import_count += rule.imports.len();
        }
        stats.has_global = files.iter().any(|f| f.scope == RulesScope::Global);
        stats.has_local = files.iter().any(|f| f.scope == RulesScope::ProjectLocal);
        stats.has_modular = files.iter().any(|f| {
            f.scope == RulesScope::Subdirectory || f.relative_path.starts_with(".claude/rules/")
        });

        Self {
            project_root: project_root.into(),
            timestamp: crate::current_timestamp(),
            files,
            all_rules,
            stats,
        }
    }

    /// Creates an empty snapshot for a project with no rule files.
    #[must_use]
    pub fn empty(project_root: impl Into<PathBuf>) -> Self {
        Self::new(project_root, Vec::new())
    }

    /// Finds a file by its relative path.
    ///
    /// Leading `./` and backslashes are normalized before comparison.
    #[must_use]
    pub fn find_file(&self, relative_path: &str) -> Option<&RulesFile> {
        let wanted = normalize_relative(relative_path);
        self.files
            .iter()
            .find(|f| normalize_relative(&f.relative_path) == wanted)
    }

    /// Counts rules anywhere in the snapshot owned by a section (case-insensitive).
    #[must_use]
    pub fn rules_in_section(&self, section: &str) -> usize {
        let wanted = section.trim().to_lowercase();
        self.all_rules
            .iter()
            .filter(|rule| {
                rule.section
                    .as_deref()
                    .is_some_and(|s| s.trim().to_lowercase() == wanted)
            })
            .count()
    }
}

fn normalize_relative(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    unified
        .strip_prefix("./")
        .map_or_else(|| unified.clone(), str::to_string)
}
