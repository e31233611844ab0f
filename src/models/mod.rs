//! Data models for rulewright.
//!
//! This module contains all the core data structures used throughout the system.

mod insight;
mod pipeline;
mod rules;
mod suggestion;
mod write;

pub use insight::{AnalysisResult, CrossSessionPattern, Insight, SessionInfo};
pub use pipeline::{
    CrossSessionResult, PipelineResult, PipelineStats, SessionPipelineResult, SuggestionSet,
    SuggestionStats,
};
pub use rules::{Rule, RuleEmphasis, RuleFormat, RulesFile, RulesScope, RulesSnapshot, RulesStats};
pub use suggestion::{
    DiffLine, DiffType, LlmSuggestion, Priority, Suggestion, SuggestionContent, SuggestionDiff,
    SuggestionStatus, SuggestionType,
};
pub use write::{HistoryEntry, WriteAction, WriteResult};
