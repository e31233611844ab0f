//! Per-session pipeline orchestrator.
//!
//! One run moves through fixed phases:
//!
//! 1. Dry runs return placeholder results without calling the backend.
//! 2. Every new session gets a combined analyze-and-suggest task, started
//!    under the bounded-concurrency runner.
//! 3. Already-analyzed results get suggestion-only calls while phase 2 runs.
//! 4. Phase 2 results are consumed in session order, built into suggestions
//!    and merged into the accumulator.
//! 5. Cross-session synthesis runs when at least two sessions produced
//!    analyses with at least one insight between them.
//! 6. A non-empty accumulated set is persisted with summary stats.
//!
//! A failing session or synthesis call is reported through
//! [`PipelineCallbacks::on_warning`] and degrades to an empty result. Nothing
//! aborts the run.

use crate::llm::{ModelOptions, SuggestionBackend, existing_suggestions_context};
use crate::models::{
    AnalysisResult, CrossSessionResult, Insight, LlmSuggestion, PipelineResult, PipelineStats,
    RulesSnapshot, SessionInfo, SessionPipelineResult, Suggestion, SuggestionSet, SuggestionStats,
};
use crate::services::concurrency::start_with_concurrency;
use crate::services::deduplication::{DedupConfig, DedupEngine};
use crate::services::diff_builder::build_suggestion;
use crate::storage::PipelineStore;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Pipeline tuning.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `RULEWRIGHT_PIPELINE_CONCURRENCY` | usize | `3` | Sessions analyzed at once |
/// | `RULEWRIGHT_PIPELINE_BATCH_SIZE` | usize | `15` | Insights per suggestion call |
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum sessions analyzed concurrently.
    pub concurrency: usize,
    /// Insights per suggestion-generation call.
    pub batch_size: usize,
    /// Whether cross-session synthesis runs at all.
    pub cross_session: bool,
    /// Default model, overridden by [`PipelineOptions::model`].
    pub model: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            batch_size: 15,
            cross_session: true,
            model: None,
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides on top of existing values.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("RULEWRIGHT_PIPELINE_CONCURRENCY") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.concurrency = n.max(1);
            }
        }
        if let Ok(v) = std::env::var("RULEWRIGHT_PIPELINE_BATCH_SIZE") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.batch_size = n.max(1);
            }
        }
        self
    }

    /// Builder method to set the session concurrency.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Builder method to set the insight batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Builder method to enable or disable cross-session synthesis.
    #[must_use]
    pub const fn with_cross_session(mut self, enabled: bool) -> Self {
        self.cross_session = enabled;
        self
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Skip every backend call and return placeholders.
    pub dry_run: bool,
    /// Skip cross-session synthesis for this run.
    pub skip_cross_session: bool,
    /// Ask the backend for verbose diagnostics.
    pub verbose: bool,
    /// Model override.
    pub model: Option<String>,
}

/// Progress hooks. Every method has a default, so implementors pick what
/// they need.
pub trait PipelineCallbacks: Send + Sync {
    /// A session's analysis task started.
    fn on_session_analyzing(&self, _session: &SessionInfo) {}

    /// A session's analysis finished and was persisted.
    fn on_session_analyzed(&self, _session: &SessionInfo, _analysis: &AnalysisResult) {}

    /// A session was fully processed. `result.new_suggestions` holds exactly
    /// what this session added to the accumulated set.
    fn on_session_complete(&self, _result: &SessionPipelineResult) {}

    /// Cross-session synthesis produced patterns.
    fn on_cross_session_complete(&self, _result: &CrossSessionResult) {}

    /// Something failed without stopping the run.
    fn on_warning(&self, message: &str) {
        warn!("{message}");
    }
}

/// Callbacks that only log warnings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCallbacks;

impl PipelineCallbacks for TracingCallbacks {}

/// Suggestions and analyses gathered during a run.
#[derive(Debug, Clone, Default)]
pub struct PipelineAccumulator {
    /// Current deduplicated, ranked suggestions.
    pub suggestions: Vec<Suggestion>,
    /// Analyses in the order they were recorded.
    pub analysis_results: Vec<AnalysisResult>,
    /// Sessions that contributed analyses.
    pub session_ids: Vec<String>,
    insight_sessions: HashMap<String, Vec<String>>,
}

impl PipelineAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an analysis and indexes its insights by session.
    pub fn record_analysis(&mut self, analysis: &AnalysisResult) {
        for insight in &analysis.insights {
            self.link_insight(&insight.id, &insight.session_id);
        }
        if !self.session_ids.contains(&analysis.session_id) {
            self.session_ids.push(analysis.session_id.clone());
        }
        self.analysis_results.push(analysis.clone());
    }

    fn link_insight(&mut self, insight_id: &str, session_id: &str) {
        let sessions = self.insight_sessions.entry(insight_id.to_string()).or_default();
        if !sessions.iter().any(|s| s == session_id) {
            sessions.push(session_id.to_string());
        }
    }

    /// Insight-id to session-ids map used when building suggestions.
    #[must_use]
    pub const fn insight_sessions(&self) -> &HashMap<String, Vec<String>> {
        &self.insight_sessions
    }

    /// Total insights across recorded analyses.
    #[must_use]
    pub fn insight_count(&self) -> usize {
        self.analysis_results.iter().map(|r| r.insights.len()).sum()
    }

    /// Ids of the current suggestions.
    #[must_use]
    pub fn suggestion_ids(&self) -> HashSet<String> {
        self.suggestions.iter().map(|s| s.id.clone()).collect()
    }

    /// Merges built suggestions, returning the ones newly admitted.
    pub fn merge(&mut self, engine: &DedupEngine, incoming: Vec<Suggestion>) -> Vec<Suggestion> {
        let outcome = engine.merge_incremental(&self.suggestions, incoming);
        self.suggestions = outcome.merged;
        outcome.admitted
    }

    /// Current suggestions whose ids are not in `prior`.
    #[must_use]
    pub fn admitted_since(&self, prior: &HashSet<String>) -> Vec<Suggestion> {
        self.suggestions
            .iter()
            .filter(|s| !prior.contains(&s.id))
            .cloned()
            .collect()
    }
}

/// Result of a batched suggestion-generation pass.
#[derive(Debug, Default)]
struct Generation {
    raw_count: usize,
    batches: usize,
    failed_batches: usize,
    last_error: Option<String>,
}

impl Generation {
    /// An error message when every batch failed.
    fn error(self) -> Option<String> {
        if self.batches > 0 && self.failed_batches == self.batches {
            self.last_error
        } else {
            None
        }
    }
}

/// Drives analysis and suggestion generation over a set of sessions.
pub struct SessionPipeline<B, S> {
    backend: Arc<B>,
    store: Arc<S>,
    config: PipelineConfig,
    engine: DedupEngine,
}

impl<B, S> SessionPipeline<B, S>
where
    B: SuggestionBackend,
    S: PipelineStore + 'static,
{
    /// Creates a pipeline with default configuration.
    #[must_use]
    pub fn new(backend: Arc<B>, store: Arc<S>) -> Self {
        Self {
            backend,
            store,
            config: PipelineConfig::default(),
            engine: DedupEngine::default(),
        }
    }

    /// Replaces the pipeline configuration.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the dedup thresholds.
    #[must_use]
    pub const fn with_dedup_config(mut self, config: DedupConfig) -> Self {
        self.engine = DedupEngine::new(config);
        self
    }

    fn model_options(&self, options: &PipelineOptions) -> ModelOptions {
        ModelOptions {
            model: options.model.clone().or_else(|| self.config.model.clone()),
            verbose: options.verbose,
        }
    }

    /// Runs every phase over `sessions` (needing analysis) and
    /// `existing_results` (already analyzed, needing suggestions only).
    #[instrument(
        skip_all,
        fields(sessions = sessions.len(), existing = existing_results.len(), dry_run = options.dry_run)
    )]
    pub async fn run(
        &self,
        sessions: Vec<SessionInfo>,
        existing_results: Vec<AnalysisResult>,
        snapshot: Arc<RulesSnapshot>,
        accumulator: &mut PipelineAccumulator,
        options: &PipelineOptions,
        callbacks: Arc<dyn PipelineCallbacks>,
    ) -> PipelineResult {
        let started = Instant::now();
        let sessions_total = sessions.len() + existing_results.len();

        if options.dry_run {
            return Self::dry_run(sessions, existing_results, callbacks.as_ref(), started);
        }

        let model = self.model_options(options);
        let ordered: Vec<String> = sessions.iter().map(|s| s.session_id.clone()).collect();
        let handles = start_with_concurrency(
            sessions.into_iter().map(|session| {
                let backend = Arc::clone(&self.backend);
                let store = Arc::clone(&self.store);
                let snapshot = Arc::clone(&snapshot);
                let callbacks = Arc::clone(&callbacks);
                let model = model.clone();
                move || async move {
                    callbacks.on_session_analyzing(&session);
                    let output = backend
                        .analyze_and_suggest(&session, &snapshot, &model)
                        .await?;
                    store.save_analysis_result(&output.analysis)?;
                    store.mark_session_analyzed(&session, output.analysis.insights.len())?;
                    callbacks.on_session_analyzed(&session, &output.analysis);
                    Ok::<_, crate::Error>(output)
                }
            }),
            self.config.concurrency,
        );

        let mut results = Vec::with_capacity(sessions_total);

        for analysis in existing_results {
            let prior = accumulator.suggestion_ids();
            accumulator.record_analysis(&analysis);
            let generation = self
                .generate(&analysis.insights, &snapshot, accumulator, &model, callbacks.as_ref())
                .await;
            let raw_suggestion_count = generation.raw_count;
            let error = generation.error();
            let result = SessionPipelineResult {
                session_id: analysis.session_id.clone(),
                new_suggestions: accumulator.admitted_since(&prior),
                analysis: Some(analysis),
                raw_suggestion_count,
                error,
            };
            Self::count_session(&result);
            callbacks.on_session_complete(&result);
            results.push(result);
        }

        for (session_id, handle) in ordered.into_iter().zip(handles) {
            let result = match handle.await {
                Ok(output) => {
                    accumulator.record_analysis(&output.analysis);
                    let raw_suggestion_count = output.raw_suggestions.len();
                    let built = Self::build_all(&output.raw_suggestions, &snapshot, accumulator);
                    let new_suggestions = accumulator.merge(&self.engine, built);
                    debug!(
                        session_id = %session_id,
                        raw = raw_suggestion_count,
                        admitted = new_suggestions.len(),
                        "session merged"
                    );
                    SessionPipelineResult {
                        session_id,
                        analysis: Some(output.analysis),
                        new_suggestions,
                        raw_suggestion_count,
                        error: None,
                    }
                },
                Err(e) => {
                    callbacks.on_warning(&format!("Session {session_id} failed: {e}"));
                    SessionPipelineResult::failed(session_id, e.to_string())
                },
            };
            Self::count_session(&result);
            callbacks.on_session_complete(&result);
            results.push(result);
        }

        let cross_session = if options.skip_cross_session || !self.config.cross_session {
            None
        } else {
            self.cross_session(&snapshot, accumulator, &model, callbacks.as_ref())
                .await
        };

        let suggestion_set = self.persist(&snapshot, accumulator, callbacks.as_ref());

        let sessions_succeeded = results.iter().filter(|r| r.succeeded()).count();
        let stats = PipelineStats {
            sessions_total,
            sessions_succeeded,
            sessions_failed: results.len() - sessions_succeeded,
            insights_total: results
                .iter()
                .filter_map(|r| r.analysis.as_ref())
                .map(|a| a.insights.len())
                .sum(),
            suggestions_total: accumulator.suggestions.len(),
            duration_ms: elapsed_ms(started),
        };
        info!(
            sessions_succeeded = stats.sessions_succeeded,
            sessions_failed = stats.sessions_failed,
            suggestions_total = stats.suggestions_total,
            duration_ms = stats.duration_ms,
            "pipeline run complete"
        );

        PipelineResult {
            sessions: results,
            cross_session,
            suggestion_set,
            stats,
        }
    }

    fn dry_run(
        sessions: Vec<SessionInfo>,
        existing_results: Vec<AnalysisResult>,
        callbacks: &dyn PipelineCallbacks,
        started: Instant,
    ) -> PipelineResult {
        let ids = sessions
            .into_iter()
            .map(|s| s.session_id)
            .chain(existing_results.into_iter().map(|r| r.session_id));
        let results: Vec<SessionPipelineResult> = ids
            .map(|session_id| {
                let result = SessionPipelineResult {
                    analysis: Some(AnalysisResult::placeholder(&session_id)),
                    session_id,
                    new_suggestions: Vec::new(),
                    raw_suggestion_count: 0,
                    error: None,
                };
                callbacks.on_session_complete(&result);
                result
            })
            .collect();

        PipelineResult {
            stats: PipelineStats {
                sessions_total: results.len(),
                sessions_succeeded: results.len(),
                duration_ms: elapsed_ms(started),
                ..PipelineStats::default()
            },
            sessions: results,
            cross_session: None,
            suggestion_set: None,
        }
    }

    fn count_session(result: &SessionPipelineResult) {
        let outcome = if result.succeeded() { "succeeded" } else { "failed" };
        metrics::counter!("pipeline_sessions_total", "outcome" => outcome).increment(1);
    }

    fn build_all(
        raw: &[LlmSuggestion],
        snapshot: &RulesSnapshot,
        accumulator: &PipelineAccumulator,
    ) -> Vec<Suggestion> {
        let built: Vec<Suggestion> = raw
            .iter()
            .filter_map(|r| build_suggestion(r, snapshot, accumulator.insight_sessions()))
            .collect();
        if built.len() < raw.len() {
            debug!(dropped = raw.len() - built.len(), "raw suggestions not buildable");
        }
        built
    }

    /// Calls suggestion generation in batches, merging after each batch so
    /// the next one sees the updated context.
    async fn generate(
        &self,
        insights: &[Insight],
        snapshot: &RulesSnapshot,
        accumulator: &mut PipelineAccumulator,
        model: &ModelOptions,
        callbacks: &dyn PipelineCallbacks,
    ) -> Generation {
        let mut generation = Generation::default();
        for chunk in insights.chunks(self.config.batch_size.max(1)) {
            generation.batches += 1;
            let context = existing_suggestions_context(&accumulator.suggestions);
            match self
                .backend
                .generate_suggestions(chunk, snapshot, &context, model)
                .await
            {
                Ok(generated) => {
                    generation.raw_count += generated.suggestions.len();
                    let built = Self::build_all(&generated.suggestions, snapshot, accumulator);
                    accumulator.merge(&self.engine, built);
                },
                Err(e) => {
                    callbacks.on_warning(&format!("Suggestion generation failed: {e}"));
                    generation.failed_batches += 1;
                    generation.last_error = Some(e.to_string());
                },
            }
        }
        generation
    }

    async fn cross_session(
        &self,
        snapshot: &RulesSnapshot,
        accumulator: &mut PipelineAccumulator,
        model: &ModelOptions,
        callbacks: &dyn PipelineCallbacks,
    ) -> Option<CrossSessionResult> {
        if accumulator.analysis_results.len() < 2 || accumulator.insight_count() == 0 {
            return None;
        }

        let patterns = match self
            .backend
            .synthesize_cross_sessions(&accumulator.analysis_results, &snapshot.project_root, model)
            .await
        {
            Ok(patterns) if !patterns.is_empty() => patterns,
            Ok(_) => return None,
            Err(e) => {
                callbacks.on_warning(&format!("Cross-session synthesis failed: {e}"));
                return None;
            },
        };

        if let Err(e) = self.store.save_cross_session_patterns(&patterns) {
            callbacks.on_warning(&format!("Could not save cross-session patterns: {e}"));
        }
        if let Err(e) = self.store.mark_cross_session_done() {
            callbacks.on_warning(&format!("Could not update audit log: {e}"));
        }

        let insights: Vec<Insight> = patterns.iter().map(|p| p.to_insight()).collect();
        for pattern in &patterns {
            for session_id in &pattern.session_ids {
                accumulator.link_insight(&pattern.id, session_id);
            }
        }

        let prior = accumulator.suggestion_ids();
        self.generate(&insights, snapshot, accumulator, model, callbacks)
            .await;
        let result = CrossSessionResult {
            patterns,
            new_suggestions: accumulator.admitted_since(&prior),
        };
        callbacks.on_cross_session_complete(&result);
        Some(result)
    }

    fn persist(
        &self,
        snapshot: &RulesSnapshot,
        accumulator: &PipelineAccumulator,
        callbacks: &dyn PipelineCallbacks,
    ) -> Option<SuggestionSet> {
        if accumulator.suggestions.is_empty() {
            return None;
        }
        let stats = SuggestionStats::compute(&accumulator.suggestions, snapshot.stats.total_rules);
        let set = SuggestionSet::new(
            &snapshot.project_root,
            accumulator.session_ids.clone(),
            accumulator.suggestions.clone(),
            stats,
        );
        match self.store.save_suggestion_set(&set) {
            Ok(path) => {
                debug!(path = %path.display(), "suggestion set saved");
                Some(set)
            },
            Err(e) => {
                callbacks.on_warning(&format!("Could not save suggestion set: {e}"));
                None
            },
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiffLine, Priority, SuggestionDiff, SuggestionStatus, SuggestionType};

    fn suggestion(id: &str, title: &str) -> Suggestion {
        Suggestion {
            id: id.to_string(),
            suggestion_type: SuggestionType::Add,
            priority: Priority::Medium,
            confidence: 0.7,
            title: title.to_string(),
            rationale: String::new(),
            target_file: "CLAUDE.md".to_string(),
            target_section: None,
            diff: SuggestionDiff::add(DiffLine::from_text(title), None, None),
            source_insight_ids: Vec::new(),
            source_session_ids: Vec::new(),
            split_target: None,
            status: SuggestionStatus::Pending,
        }
    }

    fn analysis(session_id: &str, insight_ids: &[&str]) -> AnalysisResult {
        AnalysisResult {
            session_id: session_id.to_string(),
            analyzed_at: 0,
            insights: insight_ids
                .iter()
                .map(|id| Insight {
                    id: (*id).to_string(),
                    session_id: session_id.to_string(),
                    category: "correction".to_string(),
                    title: (*id).to_string(),
                    description: String::new(),
                    evidence: Vec::new(),
                    confidence: 0.8,
                })
                .collect(),
            duration_ms: 0,
            model: None,
            dry_run: false,
        }
    }

    #[test]
    fn test_accumulator_indexes_insights() {
        let mut acc = PipelineAccumulator::new();
        acc.record_analysis(&analysis("s1", &["i1", "i2"]));
        acc.record_analysis(&analysis("s2", &["i3"]));
        acc.link_insight("i1", "s2");
        acc.link_insight("i1", "s2");

        assert_eq!(acc.insight_count(), 3);
        assert_eq!(acc.session_ids, vec!["s1", "s2"]);
        assert_eq!(acc.insight_sessions()["i1"], vec!["s1", "s2"]);
    }

    #[test]
    fn test_accumulator_reports_only_new_survivors() {
        let engine = DedupEngine::default();
        let mut acc = PipelineAccumulator::new();

        let first = acc.merge(&engine, vec![suggestion("a", "Use pnpm for installs")]);
        assert_eq!(first.len(), 1);

        let prior = acc.suggestion_ids();
        let second = acc.merge(&engine, vec![
            suggestion("b", "Use pnpm for installs"),
            suggestion("c", "Deploy with fly"),
        ]);
        assert_eq!(second.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(acc.admitted_since(&prior).len(), 1);
        assert_eq!(acc.suggestions.len(), 2);
    }

    #[test]
    fn test_generation_error_only_when_all_batches_fail() {
        let partial = Generation {
            batches: 2,
            failed_batches: 1,
            last_error: Some("boom".to_string()),
            ..Generation::default()
        };
        assert!(partial.error().is_none());

        let total = Generation {
            batches: 2,
            failed_batches: 2,
            last_error: Some("boom".to_string()),
            ..Generation::default()
        };
        assert_eq!(total.error().as_deref(), Some("boom"));
        assert!(Generation::default().error().is_none());
    }

    #[test]
    fn test_config_builders() {
        let config = PipelineConfig::default()
            .with_concurrency(5)
            .with_batch_size(10)
            .with_cross_session(false);
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.batch_size, 10);
        assert!(!config.cross_session);
        assert_eq!(PipelineConfig::default().concurrency, 3);
        assert_eq!(PipelineConfig::default().batch_size, 15);
    }
}
