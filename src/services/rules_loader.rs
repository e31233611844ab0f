//! Rules file discovery and parsing.
//!
//! Builds the [`RulesSnapshot`] the diff builder reads. Files are found in a
//! fixed order:
//!
//! 1. `~/.claude/CLAUDE.md` (only with [`RulesLoader::with_global`])
//! 2. `CLAUDE.md`
//! 3. `CLAUDE.local.md`
//! 4. `.claude/CLAUDE.md`
//! 5. `.claude/rules/**/*.md`, sorted
//! 6. `CLAUDE.md` in subdirectories up to three levels deep, sorted
//!
//! Hidden directories, `target` and `node_modules` are never descended into.

use crate::markdown::heading_level;
use crate::models::{Rule, RuleEmphasis, RuleFormat, RulesFile, RulesScope, RulesSnapshot};
use crate::{Error, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::UNIX_EPOCH;
use tracing::{debug, instrument};

/// Deepest subdirectory level searched for nested `CLAUDE.md` files.
const MAX_SUBDIRECTORY_DEPTH: usize = 3;

/// Directories never searched.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];

static NUMBERED_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.)]\s+(.*)$").unwrap_or_else(|_| unreachable!()));

static IMPORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)@([A-Za-z0-9_~./-]+[A-Za-z0-9_/-])").unwrap_or_else(|_| unreachable!())
});

static STRONG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:MUST|NEVER|ALWAYS|DO NOT|SHOULD NOT)\b|\*\*[^*]+\*\*")
        .unwrap_or_else(|_| unreachable!())
});

static CRITICAL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:IMPORTANT|CRITICAL)\b").unwrap_or_else(|_| unreachable!()));

/// Discovers and parses a project's rule files.
#[derive(Debug, Clone)]
pub struct RulesLoader {
    project_root: PathBuf,
    include_global: bool,
    home_dir: Option<PathBuf>,
}

impl RulesLoader {
    /// Creates a loader for `project_root`, without global rules.
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            include_global: false,
            home_dir: directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()),
        }
    }

    /// Includes `~/.claude/CLAUDE.md` when it exists.
    #[must_use]
    pub const fn with_global(mut self, include_global: bool) -> Self {
        self.include_global = include_global;
        self
    }

    /// Overrides the home directory used to find global rules.
    #[must_use]
    pub fn with_home_dir(mut self, home_dir: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home_dir.into());
        self
    }

    /// Lists rule files as `(path, scope, relative path)` in discovery order.
    #[must_use]
    pub fn discover(&self) -> Vec<(PathBuf, RulesScope, String)> {
        let mut found = Vec::new();

        if self.include_global {
            if let Some(home) = &self.home_dir {
                let global = home.join(".claude").join("CLAUDE.md");
                if global.is_file() {
                    found.push((global, RulesScope::Global, "~/.claude/CLAUDE.md".to_string()));
                }
            }
        }

        for (relative, scope) in [
            ("CLAUDE.md", RulesScope::Project),
            ("CLAUDE.local.md", RulesScope::ProjectLocal),
            (".claude/CLAUDE.md", RulesScope::Project),
        ] {
            let path = self.project_root.join(relative);
            if path.is_file() {
                found.push((path, scope, relative.to_string()));
            }
        }

        let mut modular = Vec::new();
        collect_markdown(&self.project_root.join(".claude").join("rules"), &mut modular);
        modular.sort();
        for path in modular {
            if let Some(relative) = self.relative(&path) {
                found.push((path, RulesScope::Project, relative));
            }
        }

        let mut nested = Vec::new();
        collect_nested_rules(&self.project_root, 1, &mut nested);
        nested.sort();
        for path in nested {
            if let Some(relative) = self.relative(&path) {
                found.push((path, RulesScope::Subdirectory, relative));
            }
        }

        found
    }

    /// Loads every discovered file into a snapshot.
    ///
    /// Unreadable files are skipped with a debug log.
    #[instrument(skip(self), fields(project_root = %self.project_root.display()))]
    pub fn load(&self) -> RulesSnapshot {
        let files: Vec<RulesFile> = self
            .discover()
            .into_iter()
            .filter_map(|(path, scope, relative)| {
                load_rules_file(&path, scope, &relative)
                    .map_err(|e| debug!(path = %path.display(), error = %e, "skipping rules file"))
                    .ok()
            })
            .collect();
        debug!(files = files.len(), "rules snapshot loaded");
        RulesSnapshot::new(&self.project_root, files)
    }

    fn relative(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.project_root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }
}

fn is_searchable_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| !name.starts_with('.') && !SKIPPED_DIRS.contains(&name))
}

fn collect_markdown(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_markdown(&path, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
            out.push(path);
        }
    }
}

fn collect_nested_rules(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    if depth > MAX_SUBDIRECTORY_DEPTH {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() || !is_searchable_dir(&path) {
            continue;
        }
        let candidate = path.join("CLAUDE.md");
        if candidate.is_file() {
            out.push(candidate);
        }
        collect_nested_rules(&path, depth + 1, out);
    }
}

/// Reads and parses one rules file.
pub fn load_rules_file(path: &Path, scope: RulesScope, relative_path: &str) -> Result<RulesFile> {
    let content = fs::read_to_string(path).map_err(|e| Error::OperationFailed {
        operation: "read_rules_file".to_string(),
        cause: format!("{}: {e}", path.display()),
    })?;
    let metadata = fs::metadata(path).map_err(|e| Error::operation("stat_rules_file", e))?;
    let last_modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs());

    Ok(RulesFile {
        path: path.to_path_buf(),
        scope,
        relative_path: relative_path.to_string(),
        rules: parse_rules(&content, relative_path, scope),
        content,
        last_modified,
        size: metadata.len(),
    })
}

fn classify_emphasis(text: &str) -> RuleEmphasis {
    if CRITICAL_PATTERN.is_match(text) {
        RuleEmphasis::Critical
    } else if STRONG_PATTERN.is_match(text) {
        RuleEmphasis::Strong
    } else {
        RuleEmphasis::Normal
    }
}

fn extract_imports(text: &str) -> Vec<String> {
    IMPORT_PATTERN
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Strips a list marker, returning the format and the remaining text.
fn list_item(line: &str) -> Option<(RuleFormat, &str)> {
    let trimmed = line.trim_start();
    for marker in ["- ", "* ", "+ "] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return Some((RuleFormat::Bullet, rest.trim()));
        }
    }
    NUMBERED_PATTERN
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| (RuleFormat::Numbered, m.as_str().trim()))
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

struct PendingRule {
    text: String,
    format: RuleFormat,
    line_start: usize,
    line_end: usize,
}

struct RuleParser<'a> {
    relative_path: &'a str,
    scope: RulesScope,
    hierarchy: Vec<(usize, String)>,
    pending: Option<PendingRule>,
    rules: Vec<Rule>,
}

impl RuleParser<'_> {
    fn flush(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let text = pending.text.trim().to_string();
        if text.is_empty() {
            return;
        }
        let hierarchy: Vec<String> = self.hierarchy.iter().map(|(_, h)| h.clone()).collect();
        self.rules.push(Rule {
            id: format!("{}:{}", self.relative_path, pending.line_start),
            section: hierarchy.last().cloned(),
            hierarchy,
            source_file: self.relative_path.to_string(),
            source_scope: self.scope,
            line_start: pending.line_start,
            line_end: pending.line_end,
            format: pending.format,
            emphasis: classify_emphasis(&text),
            imports: extract_imports(&text),
            text,
        });
    }

    fn enter_heading(&mut self, level: usize, text: &str) {
        self.flush();
        while self.hierarchy.last().is_some_and(|(l, _)| *l >= level) {
            self.hierarchy.pop();
        }
        self.hierarchy.push((level, text.to_string()));
    }

    fn start(&mut self, format: RuleFormat, text: &str, line: usize) {
        self.flush();
        self.pending = Some(PendingRule {
            text: text.to_string(),
            format,
            line_start: line,
            line_end: line,
        });
    }

    /// Extends the open rule; returns false when there is none.
    fn extend(&mut self, text: &str, line: usize) -> bool {
        match &mut self.pending {
            Some(pending) => {
                pending.text.push(' ');
                pending.text.push_str(text);
                pending.line_end = line;
                true
            },
            None => false,
        }
    }
}

/// Parses rules out of markdown content.
///
/// List items become one rule each, with indented continuation lines folded
/// in. Consecutive prose lines form one paragraph rule. Fenced code blocks
/// are skipped.
#[must_use]
pub fn parse_rules(content: &str, relative_path: &str, scope: RulesScope) -> Vec<Rule> {
    let mut parser = RuleParser {
        relative_path,
        scope,
        hierarchy: Vec::new(),
        pending: None,
        rules: Vec::new(),
    };
    let mut in_fence = false;

    for (index, line) in content.lines().enumerate() {
        let number = index + 1;
        if is_fence(line) {
            parser.flush();
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if line.trim().is_empty() {
            parser.flush();
            continue;
        }
        if let Some(level) = heading_level(line) {
            let text = line.trim_start_matches('#').trim();
            parser.enter_heading(level, text);
            continue;
        }
        if let Some((format, text)) = list_item(line) {
            parser.start(format, text, number);
            continue;
        }

        let continues_list = line.starts_with(' ') || line.starts_with('\t');
        let open_paragraph = parser
            .pending
            .as_ref()
            .is_some_and(|p| p.format == RuleFormat::Paragraph);
        if (continues_list || open_paragraph) && parser.extend(line.trim(), number) {
            continue;
        }
        parser.start(RuleFormat::Paragraph, line.trim(), number);
    }
    parser.flush();
    parser.rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    const RULES: &str = "\
# Project

Intro paragraph
spanning two lines.

## Testing
- Run `pnpm test`
  before pushing
1. IMPORTANT: never skip CI

```bash
# not a heading
- not a rule
```

### Fixtures
* You MUST use factories
- See @docs/testing.md
";

    #[test]
    fn test_parse_rules_structure() {
        let rules = parse_rules(RULES, "CLAUDE.md", RulesScope::Project);
        let texts: Vec<&str> = rules.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Intro paragraph spanning two lines.",
                "Run `pnpm test` before pushing",
                "IMPORTANT: never skip CI",
                "You MUST use factories",
                "See @docs/testing.md",
            ]
        );

        assert_eq!(rules[0].format, RuleFormat::Paragraph);
        assert_eq!((rules[0].line_start, rules[0].line_end), (3, 4));
        assert_eq!(rules[0].section.as_deref(), Some("Project"));

        assert_eq!(rules[1].id, "CLAUDE.md:7");
        assert_eq!((rules[1].line_start, rules[1].line_end), (7, 8));
        assert_eq!(rules[1].hierarchy, vec!["Project", "Testing"]);

        assert_eq!(rules[2].format, RuleFormat::Numbered);
        assert_eq!(rules[2].emphasis, RuleEmphasis::Critical);

        assert_eq!(rules[3].section.as_deref(), Some("Fixtures"));
        assert_eq!(rules[3].hierarchy, vec!["Project", "Testing", "Fixtures"]);
        assert_eq!(rules[3].emphasis, RuleEmphasis::Strong);

        assert_eq!(rules[4].imports, vec!["docs/testing.md"]);
    }

    #[test_case("plain text" => RuleEmphasis::Normal; "normal")]
    #[test_case("**bold** guidance" => RuleEmphasis::Strong; "bold")]
    #[test_case("NEVER commit secrets" => RuleEmphasis::Strong; "uppercase directive")]
    #[test_case("CRITICAL: keep backups" => RuleEmphasis::Critical; "critical marker")]
    fn test_classify_emphasis(text: &str) -> RuleEmphasis {
        classify_emphasis(text)
    }

    #[test]
    fn test_email_is_not_an_import() {
        assert!(extract_imports("mail dev@example.com").is_empty());
        assert_eq!(extract_imports("@README.md and @~/notes.md"), vec![
            "README.md",
            "~/notes.md"
        ]);
    }

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_discover_order_and_skips() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        let root = project.path();
        write(root, "CLAUDE.md", "- root\n");
        write(root, "CLAUDE.local.md", "- local\n");
        write(root, ".claude/CLAUDE.md", "- dot\n");
        write(root, ".claude/rules/b.md", "- b\n");
        write(root, ".claude/rules/nested/a.md", "- a\n");
        write(root, ".claude/rules/notes.txt", "ignored");
        write(root, "api/CLAUDE.md", "- api\n");
        write(root, "a/b/c/CLAUDE.md", "- deep\n");
        write(root, "a/b/c/d/CLAUDE.md", "- too deep\n");
        write(root, "node_modules/pkg/CLAUDE.md", "- vendored\n");
        write(root, ".git/CLAUDE.md", "- hidden\n");
        write(home.path(), ".claude/CLAUDE.md", "- global\n");

        let loader = RulesLoader::new(root)
            .with_home_dir(home.path())
            .with_global(true);
        let found: Vec<(RulesScope, String)> = loader
            .discover()
            .into_iter()
            .map(|(_, scope, rel)| (scope, rel))
            .collect();

        assert_eq!(found, vec![
            (RulesScope::Global, "~/.claude/CLAUDE.md".to_string()),
            (RulesScope::Project, "CLAUDE.md".to_string()),
            (RulesScope::ProjectLocal, "CLAUDE.local.md".to_string()),
            (RulesScope::Project, ".claude/CLAUDE.md".to_string()),
            (RulesScope::Project, ".claude/rules/b.md".to_string()),
            (RulesScope::Project, ".claude/rules/nested/a.md".to_string()),
            (RulesScope::Subdirectory, "a/b/c/CLAUDE.md".to_string()),
            (RulesScope::Subdirectory, "api/CLAUDE.md".to_string()),
        ]);
    }

    #[test]
    fn test_load_builds_stats() {
        let project = TempDir::new().unwrap();
        write(project.path(), "CLAUDE.md", "## Style\n- one\n- two @a.md\n");
        write(project.path(), "CLAUDE.local.md", "Prefer tabs.\n");

        let snapshot = RulesLoader::new(project.path()).load();
        assert_eq!(snapshot.stats.total_files, 2);
        assert_eq!(snapshot.stats.total_rules, 3);
        assert_eq!(snapshot.stats.import_count, 1);
        assert!(snapshot.stats.has_local);
        assert!(!snapshot.stats.has_global);
        assert_eq!(snapshot.rules_in_section("style"), 2);
        assert_eq!(snapshot.find_file("./CLAUDE.md").unwrap().size, 27);
    }
}
