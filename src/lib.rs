//! # Rulewright
//!
//! Turns recurring corrections from AI coding-assistant sessions into edits of
//! a project's `CLAUDE.md` rule files.
//!
//! Rulewright takes loosely structured edit proposals produced by an LLM,
//! maps them onto real line ranges of heading-organized markdown, merges
//! overlapping proposals from many independent calls, and applies the
//! surviving edits with backups and atomic writes.
//!
//! ## Features
//!
//! - Section-aware diff building for `add`, `update`, `remove`, `consolidate`
//!   and `split` edits
//! - Idempotent, backup-protected, atomic application to rule files
//! - Jaccard-based deduplication and priority/confidence ranking
//! - Bounded-concurrency per-session pipeline with in-order consumption
//!
//! ## Example
//!
//! ```rust,ignore
//! use rulewright::services::applier::ApplySession;
//!
//! let mut session = ApplySession::new(store_dir);
//! for suggestion in &accepted {
//!     let result = session.apply(suggestion, project_root, None)?;
//!     if !result.success {
//!         eprintln!("{}", result.error.unwrap_or_default());
//!     }
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod llm;
pub mod markdown;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::RulewrightConfig;
pub use models::{
    DiffLine, DiffType, LlmSuggestion, Priority, RulesFile, RulesSnapshot, Suggestion,
    SuggestionDiff, SuggestionStatus, SuggestionType, WriteAction, WriteResult,
};
pub use services::applier::ApplySession;
pub use services::concurrency::{run_with_concurrency, start_with_concurrency};
pub use services::deduplication::{DedupConfig, DedupEngine, dedup_and_rank};
pub use services::diff_builder::{build_diff, build_suggestion};
pub use services::pipeline::{PipelineAccumulator, SessionPipeline};
pub use llm::SuggestionBackend;

/// Error type for rulewright operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed suggestion JSON, invalid config values, unsafe store keys |
/// | `OperationFailed` | I/O errors, serialization failures, collaborator call failures |
/// | `IntegrityViolation` | A write did not take effect when re-read |
/// | `TaskDropped` | A bounded-concurrency task panicked or was dropped |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - An LLM response contains no parseable JSON
    /// - A configuration file carries out-of-range values
    /// - A session id cannot be used as a store filename
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - Filesystem reads, writes or renames fail
    /// - JSON serialization or deserialization fails
    /// - An external analysis or suggestion call reports an error
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A write completed but the file does not contain the intended content.
    #[error("integrity check failed for {path}: {reason}")]
    IntegrityViolation {
        /// The file that failed validation.
        path: String,
        /// What was missing.
        reason: String,
    },

    /// A concurrently scheduled task never produced an outcome.
    #[error("task dropped before completion: {0}")]
    TaskDropped(String),
}

impl Error {
    /// Builds an `OperationFailed` error from an operation tag and any displayable cause.
    pub fn operation(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for rulewright operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
///
/// # Examples
///
/// ```rust
/// use rulewright::current_timestamp;
///
/// let ts = current_timestamp();
/// assert!(ts > 0);
/// ```
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
