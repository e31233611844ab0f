//! Business logic services.
//!
//! Services turn LLM output into validated edits and carry them to disk:
//! - [`diff_builder`]: raw suggestion to addressable diff
//! - [`deduplication`]: merge near-duplicates and rank
//! - [`applier`]: write suggestions to rule files
//! - [`pipeline`]: per-session orchestration over a [`crate::llm::SuggestionBackend`]

pub mod applier;
pub mod concurrency;
pub mod deduplication;
pub mod diff_builder;
pub mod pipeline;
pub mod rules_loader;
pub mod stability;

pub use applier::{ApplyConfig, ApplySession, BatchReport, apply_batch};
pub use concurrency::{TaskHandle, run_with_concurrency, start_with_concurrency};
pub use deduplication::{DedupConfig, DedupEngine, dedup_and_rank};
pub use diff_builder::{build_diff, build_suggestion};
pub use pipeline::{
    PipelineAccumulator, PipelineCallbacks, PipelineConfig, PipelineOptions, SessionPipeline,
    TracingCallbacks,
};
pub use rules_loader::{RulesLoader, load_rules_file, parse_rules};
pub use stability::wait_for_stable;
