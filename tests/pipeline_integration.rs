//! Integration tests for the session pipeline against a scripted backend.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use rulewright::llm::{AnalyzeAndSuggest, GeneratedSuggestions, ModelOptions, SuggestionBackend};
use rulewright::models::{
    AnalysisResult, CrossSessionPattern, Insight, LlmSuggestion, RulesSnapshot, SessionInfo,
    SessionPipelineResult,
};
use rulewright::services::{
    PipelineAccumulator, PipelineCallbacks, PipelineConfig, PipelineOptions, RulesLoader,
    SessionPipeline,
};
use rulewright::storage::{FileStore, PipelineStore};
use rulewright::{Error, Result};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const PROJECT_RULES: &str = "# Project\n\n## Testing\n- Use jest\n\n## Deployment\n- Deploy with fly\n";

#[derive(Clone, Default)]
struct Script {
    delay_ms: u64,
    fail: bool,
    insights: usize,
    titles: Vec<&'static str>,
}

#[derive(Default)]
struct MockBackend {
    scripts: HashMap<String, Script>,
    generated_titles: Vec<&'static str>,
    patterns: Option<std::result::Result<Vec<CrossSessionPattern>, String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    analyze_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    synthesize_calls: AtomicUsize,
    contexts: Mutex<Vec<String>>,
}

fn raw(title: &str, insight_id: &str) -> LlmSuggestion {
    LlmSuggestion::from_value(&json!({
        "type": "add",
        "targetFile": "CLAUDE.md",
        "targetSection": "Testing",
        "title": title,
        "content": {"add": format!("- {title}")},
        "sourceInsightIds": [insight_id],
    }))
    .unwrap()
}

fn insight(session_id: &str, index: usize) -> Insight {
    Insight {
        id: format!("{session_id}_i{index}"),
        session_id: session_id.to_string(),
        category: "correction".to_string(),
        title: format!("Insight {index}"),
        description: String::new(),
        evidence: Vec::new(),
        confidence: 0.8,
    }
}

fn analysis(session_id: &str, insights: usize) -> AnalysisResult {
    AnalysisResult {
        session_id: session_id.to_string(),
        analyzed_at: 0,
        insights: (0..insights).map(|i| insight(session_id, i)).collect(),
        duration_ms: 0,
        model: None,
        dry_run: false,
    }
}

impl MockBackend {
    fn with_session(mut self, session_id: &str, script: Script) -> Self {
        self.scripts.insert(session_id.to_string(), script);
        self
    }

    fn with_generated(mut self, titles: Vec<&'static str>) -> Self {
        self.generated_titles = titles;
        self
    }

    fn with_patterns(
        mut self,
        patterns: std::result::Result<Vec<CrossSessionPattern>, String>,
    ) -> Self {
        self.patterns = Some(patterns);
        self
    }

    fn calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
            + self.generate_calls.load(Ordering::SeqCst)
            + self.synthesize_calls.load(Ordering::SeqCst)
    }
}

impl SuggestionBackend for MockBackend {
    async fn analyze_and_suggest(
        &self,
        session: &SessionInfo,
        _snapshot: &RulesSnapshot,
        _options: &ModelOptions,
    ) -> Result<AnalyzeAndSuggest> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let script = self
            .scripts
            .get(&session.session_id)
            .cloned()
            .unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if script.fail {
            return Err(Error::operation("analyze_session", "model timed out"));
        }
        let insight_id = format!("{}_i0", session.session_id);
        Ok(AnalyzeAndSuggest {
            analysis: analysis(&session.session_id, script.insights),
            raw_suggestions: script.titles.iter().map(|t| raw(t, &insight_id)).collect(),
        })
    }

    async fn generate_suggestions(
        &self,
        insights: &[Insight],
        _snapshot: &RulesSnapshot,
        existing_context: &str,
        _options: &ModelOptions,
    ) -> Result<GeneratedSuggestions> {
        let call = self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.contexts
            .lock()
            .unwrap()
            .push(existing_context.to_string());

        let suggestions = self
            .generated_titles
            .get(call)
            .map(|title| vec![raw(title, &insights[0].id)])
            .unwrap_or_default();
        Ok(GeneratedSuggestions::from_parsed(suggestions, 1))
    }

    async fn synthesize_cross_sessions(
        &self,
        _results: &[AnalysisResult],
        _project_root: &Path,
        _options: &ModelOptions,
    ) -> Result<Vec<CrossSessionPattern>> {
        self.synthesize_calls.fetch_add(1, Ordering::SeqCst);
        match &self.patterns {
            Some(Ok(patterns)) => Ok(patterns.clone()),
            Some(Err(cause)) => Err(Error::operation("synthesize_cross_sessions", cause)),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
struct Recorder {
    warnings: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
}

impl PipelineCallbacks for Recorder {
    fn on_session_complete(&self, result: &SessionPipelineResult) {
        self.completed.lock().unwrap().push(result.session_id.clone());
    }

    fn on_warning(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
}

struct Harness {
    dir: TempDir,
    store: Arc<FileStore>,
    recorder: Arc<Recorder>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("CLAUDE.md"), PROJECT_RULES).unwrap();
        let store = Arc::new(FileStore::new(dir.path().join(".rulewright")));
        Self {
            dir,
            store,
            recorder: Arc::new(Recorder::default()),
        }
    }

    fn snapshot(&self) -> Arc<RulesSnapshot> {
        Arc::new(RulesLoader::new(self.dir.path()).load())
    }

    fn pipeline(&self, backend: &Arc<MockBackend>) -> SessionPipeline<MockBackend, FileStore> {
        SessionPipeline::new(Arc::clone(backend), Arc::clone(&self.store))
    }

    fn callbacks(&self) -> Arc<dyn PipelineCallbacks> {
        self.recorder.clone()
    }

    fn warnings(&self) -> Vec<String> {
        self.recorder.warnings.lock().unwrap().clone()
    }
}

fn sessions(ids: &[&str]) -> Vec<SessionInfo> {
    ids.iter()
        .map(|id| SessionInfo::new(*id, format!("/transcripts/{id}.jsonl")))
        .collect()
}

fn script(delay_ms: u64, titles: Vec<&'static str>) -> Script {
    Script {
        delay_ms,
        insights: 1,
        titles,
        ..Script::default()
    }
}

#[tokio::test]
async fn test_results_follow_input_order_with_bounded_concurrency() {
    let harness = Harness::new();
    let backend = Arc::new(
        MockBackend::default()
            .with_session("s1", script(50, vec!["Use pnpm for installs"]))
            .with_session("s2", script(0, vec!["Deploy with fly only"]))
            .with_session("s3", script(20, vec!["Prefer vitest over jest"]))
            .with_session("s4", script(10, Vec::new()))
            .with_session("s5", script(0, Vec::new())),
    );
    let options = PipelineOptions {
        skip_cross_session: true,
        ..PipelineOptions::default()
    };
    let mut accumulator = PipelineAccumulator::new();

    let result = harness
        .pipeline(&backend)
        .run(
            sessions(&["s1", "s2", "s3", "s4", "s5"]),
            Vec::new(),
            harness.snapshot(),
            &mut accumulator,
            &options,
            harness.callbacks(),
        )
        .await;

    let ids: Vec<&str> = result.sessions.iter().map(|r| r.session_id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s2", "s3", "s4", "s5"]);
    assert_eq!(
        *harness.recorder.completed.lock().unwrap(),
        vec!["s1", "s2", "s3", "s4", "s5"]
    );
    assert!(backend.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(result.stats.sessions_succeeded, 5);
    assert_eq!(result.stats.suggestions_total, 3);

    let audit = harness.store.load_audit_log().unwrap();
    assert_eq!(audit.sessions.len(), 5);
}

#[tokio::test]
async fn test_failed_session_is_reported_and_others_continue() {
    let harness = Harness::new();
    let backend = Arc::new(
        MockBackend::default()
            .with_session("s1", script(0, vec!["Use pnpm for installs"]))
            .with_session(
                "s2",
                Script {
                    fail: true,
                    ..Script::default()
                },
            )
            .with_session("s3", script(0, vec!["Deploy with fly only"])),
    );
    let options = PipelineOptions {
        skip_cross_session: true,
        ..PipelineOptions::default()
    };
    let mut accumulator = PipelineAccumulator::new();

    let result = harness
        .pipeline(&backend)
        .run(
            sessions(&["s1", "s2", "s3"]),
            Vec::new(),
            harness.snapshot(),
            &mut accumulator,
            &options,
            harness.callbacks(),
        )
        .await;

    assert_eq!(result.stats.sessions_succeeded, 2);
    assert_eq!(result.stats.sessions_failed, 1);
    let failed = &result.sessions[1];
    assert_eq!(failed.session_id, "s2");
    assert!(failed.analysis.is_none());
    assert!(failed.error.as_deref().unwrap().contains("model timed out"));
    assert!(result.sessions[2].succeeded());

    let warnings = harness.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("s2"));

    let audit = harness.store.load_audit_log().unwrap();
    assert!(!audit.sessions.contains_key("s2"));
}

#[tokio::test]
async fn test_duplicate_across_sessions_is_admitted_once() {
    let harness = Harness::new();
    let backend = Arc::new(
        MockBackend::default()
            .with_session("s1", script(0, vec!["Use pnpm for installs"]))
            .with_session("s2", script(10, vec!["Use pnpm for installs"])),
    );
    let options = PipelineOptions {
        skip_cross_session: true,
        ..PipelineOptions::default()
    };
    let mut accumulator = PipelineAccumulator::new();

    let result = harness
        .pipeline(&backend)
        .run(
            sessions(&["s1", "s2"]),
            Vec::new(),
            harness.snapshot(),
            &mut accumulator,
            &options,
            harness.callbacks(),
        )
        .await;

    assert_eq!(result.sessions[0].new_suggestions.len(), 1);
    assert!(result.sessions[1].new_suggestions.is_empty());
    assert_eq!(result.sessions[1].raw_suggestion_count, 1);
    assert_eq!(accumulator.suggestions.len(), 1);
}

#[tokio::test]
async fn test_dry_run_makes_no_calls() {
    let harness = Harness::new();
    let backend = Arc::new(MockBackend::default().with_session("s1", script(0, vec!["Use pnpm"])));
    let options = PipelineOptions {
        dry_run: true,
        ..PipelineOptions::default()
    };
    let mut accumulator = PipelineAccumulator::new();

    let result = harness
        .pipeline(&backend)
        .run(
            sessions(&["s1"]),
            vec![analysis("s0", 3)],
            harness.snapshot(),
            &mut accumulator,
            &options,
            harness.callbacks(),
        )
        .await;

    assert_eq!(backend.calls(), 0);
    assert_eq!(result.sessions.len(), 2);
    assert!(result.sessions.iter().all(|r| r.analysis.as_ref().unwrap().dry_run));
    assert!(result.suggestion_set.is_none());
    assert!(harness.store.load_latest_suggestion_set().unwrap().is_none());
}

#[tokio::test]
async fn test_existing_insights_are_batched_with_growing_context() {
    let harness = Harness::new();
    let backend = Arc::new(
        MockBackend::default().with_generated(vec!["Use pnpm for installs", "Deploy with fly only"]),
    );
    let mut accumulator = PipelineAccumulator::new();

    let result = harness
        .pipeline(&backend)
        .run(
            Vec::new(),
            vec![analysis("s0", 20)],
            harness.snapshot(),
            &mut accumulator,
            &PipelineOptions::default(),
            harness.callbacks(),
        )
        .await;

    assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 2);
    let contexts = backend.contexts.lock().unwrap().clone();
    assert!(contexts[0].is_empty());
    assert!(contexts[1].contains("Use pnpm for installs"));

    let session = &result.sessions[0];
    assert!(session.succeeded());
    assert_eq!(session.raw_suggestion_count, 2);
    assert_eq!(session.new_suggestions.len(), 2);
    assert_eq!(
        session.new_suggestions[0].source_session_ids,
        vec!["s0".to_string()]
    );
}

#[tokio::test]
async fn test_batch_size_comes_from_config() {
    let harness = Harness::new();
    let backend = Arc::new(MockBackend::default());
    let mut accumulator = PipelineAccumulator::new();

    harness
        .pipeline(&backend)
        .with_config(PipelineConfig::default().with_batch_size(5))
        .run(
            Vec::new(),
            vec![analysis("s0", 12)],
            harness.snapshot(),
            &mut accumulator,
            &PipelineOptions::default(),
            harness.callbacks(),
        )
        .await;

    assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 3);
}

fn pattern() -> CrossSessionPattern {
    CrossSessionPattern {
        id: "pat_1".to_string(),
        title: "Wrong package manager".to_string(),
        description: "Agent runs npm instead of pnpm".to_string(),
        session_ids: vec!["s1".to_string(), "s2".to_string()],
        insight_ids: vec!["s1_i0".to_string(), "s2_i0".to_string()],
        frequency: 2,
        confidence: 0.9,
    }
}

#[tokio::test]
async fn test_cross_session_synthesis_adds_linked_suggestions() {
    let harness = Harness::new();
    let backend = Arc::new(
        MockBackend::default()
            .with_session("s1", script(0, vec!["Deploy with fly only"]))
            .with_session("s2", script(0, Vec::new()))
            .with_generated(vec!["Always install with pnpm"])
            .with_patterns(Ok(vec![pattern()])),
    );
    let mut accumulator = PipelineAccumulator::new();

    let result = harness
        .pipeline(&backend)
        .run(
            sessions(&["s1", "s2"]),
            Vec::new(),
            harness.snapshot(),
            &mut accumulator,
            &PipelineOptions::default(),
            harness.callbacks(),
        )
        .await;

    let cross = result.cross_session.unwrap();
    assert_eq!(cross.patterns.len(), 1);
    assert_eq!(cross.new_suggestions.len(), 1);
    assert_eq!(
        cross.new_suggestions[0].source_session_ids,
        vec!["s1".to_string(), "s2".to_string()]
    );
    assert_eq!(accumulator.suggestions.len(), 2);

    let audit = harness.store.load_audit_log().unwrap();
    assert!(audit.cross_session_done_at.is_some());
    assert!(harness.warnings().is_empty());
}

#[tokio::test]
async fn test_cross_session_needs_two_analyses() {
    let harness = Harness::new();
    let backend = Arc::new(
        MockBackend::default()
            .with_session("s1", script(0, Vec::new()))
            .with_patterns(Ok(vec![pattern()])),
    );
    let mut accumulator = PipelineAccumulator::new();

    let result = harness
        .pipeline(&backend)
        .run(
            sessions(&["s1"]),
            Vec::new(),
            harness.snapshot(),
            &mut accumulator,
            &PipelineOptions::default(),
            harness.callbacks(),
        )
        .await;

    assert!(result.cross_session.is_none());
    assert_eq!(backend.synthesize_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_synthesis_failure_becomes_warning() {
    let harness = Harness::new();
    let backend = Arc::new(
        MockBackend::default()
            .with_session("s1", script(0, vec!["Use pnpm for installs"]))
            .with_session("s2", script(0, Vec::new()))
            .with_patterns(Err("rate limited".to_string())),
    );
    let mut accumulator = PipelineAccumulator::new();

    let result = harness
        .pipeline(&backend)
        .run(
            sessions(&["s1", "s2"]),
            Vec::new(),
            harness.snapshot(),
            &mut accumulator,
            &PipelineOptions::default(),
            harness.callbacks(),
        )
        .await;

    assert!(result.cross_session.is_none());
    assert_eq!(result.stats.sessions_succeeded, 2);
    let warnings = harness.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("rate limited"));
    assert!(harness.store.load_audit_log().unwrap().cross_session_done_at.is_none());
}

#[tokio::test]
async fn test_suggestion_set_is_persisted() {
    let harness = Harness::new();
    let backend = Arc::new(
        MockBackend::default()
            .with_session("s1", script(0, vec!["Use pnpm for installs", "Deploy with fly only"])),
    );
    let mut accumulator = PipelineAccumulator::new();

    let result = harness
        .pipeline(&backend)
        .run(
            sessions(&["s1"]),
            Vec::new(),
            harness.snapshot(),
            &mut accumulator,
            &PipelineOptions::default(),
            harness.callbacks(),
        )
        .await;

    let returned = result.suggestion_set.unwrap();
    let saved = harness.store.load_latest_suggestion_set().unwrap().unwrap();
    assert_eq!(saved.id, returned.id);
    assert_eq!(saved.suggestions.len(), 2);
    assert_eq!(saved.session_ids, vec!["s1".to_string()]);
    assert_eq!(saved.stats.total, 2);
    assert!(harness.store.load_analysis_result("s1").unwrap().is_some());
}
