//! Deduplication of candidate suggestions.
//!
//! Independent LLM calls over different sessions often propose the same
//! edit. Two suggestions are similar when any of these hold:
//! 1. **Same target**: same file and section, title word overlap above 0.6
//! 2. **Shared insight**: they cite at least one common insight
//! 3. **Title**: title word overlap above 0.8, any target
//! 4. **Content**: added-text word overlap above 0.6, any target
//!
//! Overlap is Jaccard similarity over normalized word sets. Thresholds come
//! from [`DedupConfig`].
//!
//! # Example
//!
//! ```rust,ignore
//! use rulewright::services::deduplication::{DedupConfig, DedupEngine};
//!
//! let engine = DedupEngine::new(DedupConfig::from_env());
//! let outcome = engine.merge_incremental(&accumulated, built_for_session);
//! for suggestion in &outcome.admitted {
//!     println!("new: {}", suggestion.title);
//! }
//! ```

mod config;
mod service;
mod similarity;

pub use config::DedupConfig;
pub use service::{DedupEngine, MergeOutcome, dedup_and_rank};
pub use similarity::{
    SimilarityReason, content_tokens, is_similar, jaccard, similarity_reason, title_tokens,
};
