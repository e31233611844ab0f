//! Binary entry point for rulewright.
//!
//! This binary provides the CLI over a project's rule files and the
//! suggestion sets stored for it.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow unnecessary_wraps for consistent command function signatures
#![allow(clippy::unnecessary_wraps)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use rulewright::config::RulewrightConfig;
use rulewright::llm::parse_suggestions_response;
use rulewright::models::{RulesSnapshot, Suggestion, SuggestionDiff, SuggestionSet, SuggestionStats};
use rulewright::observability;
use rulewright::services::applier::eligible_suggestions;
use rulewright::services::{ApplySession, DedupEngine, RulesLoader, apply_batch, build_suggestion};
use rulewright::storage::{FileStore, PipelineStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Rulewright - Turns assistant-session corrections into CLAUDE.md edits.
#[derive(Parser)]
#[command(name = "rulewright")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Project root (default: current directory).
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Summarize the project's rule files.
    Rules {
        /// Include ~/.claude/CLAUDE.md.
        #[arg(long)]
        global: bool,
    },

    /// List the latest suggestion set.
    Suggestions,

    /// Deduplicate and rank a JSON array of suggestions.
    Dedup {
        /// File holding the suggestions.
        file: PathBuf,
    },

    /// Build suggestions from a raw LLM response and merge them into the latest set.
    Import {
        /// File holding the response text.
        file: PathBuf,
    },

    /// Apply accepted suggestions from the latest set.
    Apply {
        /// Also apply pending suggestions.
        #[arg(long)]
        all: bool,

        /// Print what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match RulewrightConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };
    let project = cli
        .project
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let config = config.with_project_root(project);

    if let Err(e) = observability::init_from_config(&config, cli.verbose) {
        eprintln!("Failed to initialize observability: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: &RulewrightConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Rules { global } => cmd_rules(config, global),
        Commands::Suggestions => cmd_suggestions(config),
        Commands::Dedup { file } => cmd_dedup(config, &file),
        Commands::Import { file } => cmd_import(config, &file),
        Commands::Apply { all, dry_run } => cmd_apply(config, all, dry_run),
    }
}

fn load_snapshot(config: &RulewrightConfig, global: bool) -> RulesSnapshot {
    RulesLoader::new(&config.project_root)
        .with_global(global)
        .load()
}

fn cmd_rules(config: &RulewrightConfig, global: bool) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = load_snapshot(config, global);
    println!("Rules in {}", snapshot.project_root.display());
    println!();

    if snapshot.files.is_empty() {
        println!("No rule files found.");
        return Ok(());
    }

    for file in &snapshot.files {
        println!(
            "  {:<40} {:<14} {:>4} rules {:>5} lines",
            file.relative_path,
            file.scope.as_str(),
            file.rules.len(),
            file.line_count()
        );
    }
    println!();
    println!("Files: {}", snapshot.stats.total_files);
    println!("Rules: {}", snapshot.stats.total_rules);
    for (format, count) in &snapshot.stats.by_format {
        println!("  {format}: {count}");
    }
    println!("Imports: {}", snapshot.stats.import_count);
    Ok(())
}

fn describe(index: usize, suggestion: &Suggestion) -> String {
    let target = suggestion.target_section.as_ref().map_or_else(
        || suggestion.target_file.clone(),
        |section| format!("{} § {section}", suggestion.target_file),
    );
    format!(
        "{:>3}. [{}/{} {:.2}] {} ({target}) {}",
        index + 1,
        suggestion.suggestion_type,
        suggestion.priority,
        suggestion.confidence,
        suggestion.title,
        suggestion.status,
    )
}

fn cmd_suggestions(config: &RulewrightConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::new(config.resolved_store_dir());
    let Some(set) = store.load_latest_suggestion_set()? else {
        println!("No suggestion set found in {}", store.root().display());
        return Ok(());
    };

    println!("Suggestion set {} ({} sessions)", set.id, set.session_ids.len());
    println!();
    for (index, suggestion) in set.suggestions.iter().enumerate() {
        println!("{}", describe(index, suggestion));
    }
    println!();
    println!(
        "Rules: {} now, about {} after applying everything",
        set.stats.current_rule_count, set.stats.estimated_rule_count
    );
    Ok(())
}

fn cmd_dedup(config: &RulewrightConfig, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(file)?;
    let suggestions: Vec<Suggestion> = serde_json::from_str(&contents)?;
    let total = suggestions.len();
    let ranked = DedupEngine::new(config.dedup).dedup_and_rank(suggestions);
    eprintln!("{total} suggestions in, {} kept", ranked.len());
    println!("{}", serde_json::to_string_pretty(&ranked)?);
    Ok(())
}

fn cmd_import(config: &RulewrightConfig, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let response = std::fs::read_to_string(file)?;
    let raw = parse_suggestions_response(&response)?;
    let snapshot = load_snapshot(config, false);
    let built: Vec<Suggestion> = raw
        .iter()
        .filter_map(|r| build_suggestion(r, &snapshot, &HashMap::new()))
        .collect();

    let store = FileStore::new(config.resolved_store_dir());
    let (accumulated, session_ids) = match store.load_latest_suggestion_set()? {
        Some(set) => (set.suggestions, set.session_ids),
        None => (Vec::new(), Vec::new()),
    };
    let outcome = DedupEngine::new(config.dedup).merge_incremental(&accumulated, built);

    let stats = SuggestionStats::compute(&outcome.merged, snapshot.stats.total_rules);
    let set = SuggestionSet::new(&config.project_root, session_ids, outcome.merged, stats);
    let path = store.save_suggestion_set(&set)?;

    println!(
        "{} parsed, {} admitted, {} in set",
        raw.len(),
        outcome.admitted.len(),
        set.suggestions.len()
    );
    println!("Saved {}", path.display());
    Ok(())
}

fn print_diff(diff: &SuggestionDiff) {
    for line in diff.removed_lines.iter().flatten() {
        println!("      - {}", line.content);
    }
    for line in diff.added_lines.iter().flatten() {
        println!("      + {}", line.content);
    }
    for part in &diff.parts {
        print_diff(part);
    }
}

fn cmd_apply(
    config: &RulewrightConfig,
    include_pending: bool,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::new(config.resolved_store_dir());
    let Some(mut set) = store.load_latest_suggestion_set()? else {
        println!("No suggestion set found in {}", store.root().display());
        return Ok(());
    };

    if dry_run {
        let eligible = eligible_suggestions(&set.suggestions, include_pending);
        for (index, suggestion) in eligible.iter().enumerate() {
            println!("{}", describe(index, suggestion));
            print_diff(&suggestion.diff);
        }
        println!();
        println!(
            "{} would be applied, {} skipped",
            eligible.len(),
            set.suggestions.len() - eligible.len()
        );
        return Ok(());
    }

    let mut session = ApplySession::new(store.root()).with_config(config.apply);
    let report = apply_batch(
        &mut session,
        &store,
        &mut set.suggestions,
        &config.project_root,
        include_pending,
    )?;
    store.update_suggestion_set(&set)?;

    for outcome in &report.outcomes {
        match &outcome.result.error {
            None if outcome.result.unchanged => {
                println!("  = {} (already present)", outcome.suggestion_id);
            },
            None => println!(
                "  ✓ {} {} {}",
                outcome.suggestion_id,
                outcome.result.action,
                outcome.result.file_path.display()
            ),
            Some(error) => println!("  ✗ {}: {error}", outcome.suggestion_id),
        }
    }
    println!();
    println!(
        "{} applied, {} failed, {} skipped",
        report.applied(),
        report.failed(),
        report.skipped
    );
    Ok(())
}
