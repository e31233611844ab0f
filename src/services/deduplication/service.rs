//! Dedup and rank engine.
//!
//! Merges overlapping suggestions from many independent LLM calls:
//! 1. **Scan**: left to right, each suggestion is compared with the kept set
//! 2. **Select**: on a match the higher priority, then higher confidence, wins
//! 3. **Rank**: stable sort by priority, then confidence descending
//!
//! Suggestions are never edited; the engine only chooses among them.

use super::config::DedupConfig;
use super::similarity::similarity_reason;
use crate::models::Suggestion;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, instrument};

/// Engine for merging and ranking suggestions.
///
/// # Example
///
/// ```rust,ignore
/// use rulewright::services::deduplication::{DedupConfig, DedupEngine};
///
/// let engine = DedupEngine::new(DedupConfig::default());
/// let ranked = engine.dedup_and_rank(candidates);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DedupEngine {
    config: DedupConfig,
}

/// Outcome of merging one batch into an accumulated set.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// The new accumulated set, deduplicated and ranked.
    pub merged: Vec<Suggestion>,
    /// Survivors that were not in the accumulated set before.
    pub admitted: Vec<Suggestion>,
}

/// Whether `candidate` should replace `kept`.
fn outranks(candidate: &Suggestion, kept: &Suggestion) -> bool {
    match candidate.priority.rank().cmp(&kept.priority.rank()) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => candidate.confidence > kept.confidence,
    }
}

fn rank_order(a: &Suggestion, b: &Suggestion) -> Ordering {
    a.priority
        .rank()
        .cmp(&b.priority.rank())
        .then_with(|| b.confidence.total_cmp(&a.confidence))
}

impl DedupEngine {
    /// Creates an engine with the given thresholds.
    #[must_use]
    pub const fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Returns the engine's configuration.
    #[must_use]
    pub const fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Removes near-duplicates and ranks the survivors.
    ///
    /// Each suggestion is compared with the already-kept ones in scan order;
    /// the first similar one it meets is its only rival. Ties keep the
    /// earlier suggestion.
    #[must_use]
    #[instrument(skip_all, fields(input = suggestions.len()))]
    pub fn dedup_and_rank(&self, suggestions: Vec<Suggestion>) -> Vec<Suggestion> {
        let mut kept: Vec<Suggestion> = Vec::with_capacity(suggestions.len());
        let mut discarded = 0_u64;

        for candidate in suggestions {
            let rival = kept.iter().enumerate().find_map(|(index, existing)| {
                similarity_reason(&candidate, existing, &self.config).map(|reason| (index, reason))
            });

            match rival {
                None => kept.push(candidate),
                Some((index, reason)) => {
                    discarded += 1;
                    if outranks(&candidate, &kept[index]) {
                        debug!(
                            kept = %candidate.id,
                            dropped = %kept[index].id,
                            %reason,
                            "duplicate suggestion replaced"
                        );
                        kept[index] = candidate;
                    } else {
                        debug!(
                            kept = %kept[index].id,
                            dropped = %candidate.id,
                            %reason,
                            "duplicate suggestion dropped"
                        );
                    }
                },
            }
        }

        if discarded > 0 {
            metrics::counter!("dedup_discarded_total").increment(discarded);
        }

        kept.sort_by(rank_order);
        kept
    }

    /// Merges a new batch into an accumulated set.
    ///
    /// The accumulated suggestions are scanned first, so an incoming
    /// suggestion only displaces one it strictly outranks.
    #[must_use]
    pub fn merge_incremental(
        &self,
        accumulated: &[Suggestion],
        incoming: Vec<Suggestion>,
    ) -> MergeOutcome {
        let prior: HashSet<&str> = accumulated.iter().map(|s| s.id.as_str()).collect();
        let mut combined = accumulated.to_vec();
        combined.extend(incoming);

        let merged = self.dedup_and_rank(combined);
        let admitted = merged
            .iter()
            .filter(|s| !prior.contains(s.id.as_str()))
            .cloned()
            .collect();
        MergeOutcome { merged, admitted }
    }
}

/// Dedups and ranks with default thresholds.
#[must_use]
pub fn dedup_and_rank(suggestions: Vec<Suggestion>) -> Vec<Suggestion> {
    DedupEngine::default().dedup_and_rank(suggestions)
}
