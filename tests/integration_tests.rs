//! Integration tests for research runs
//!
//! These tests drive the run control surface end-to-end using mock components.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use stagewise_rs::adk::error::{ModelError, StagewiseError, WorkflowError};
use stagewise_rs::adk::model::{Content, GenerationConfig, Model};
use stagewise_rs::stagewise::config::{OutputFormat, RunConfig};
use stagewise_rs::stagewise::tools::scoring::ProviderScore;
use stagewise_rs::stagewise::tools::search::{SearchClient, SearchHit};
use stagewise_rs::stagewise::workflow::checkpoint::{
    Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, RunOutcome,
};
use stagewise_rs::stagewise::workflow::runner::RunResult;
use stagewise_rs::stagewise::workflow::service::WorkflowService;
use stagewise_rs::stagewise::workflow::state::{Stage, StateUpdate, WorkflowState};
use stagewise_rs::stagewise::workflow::step::{Collaborators, Step, StepContext};
use stagewise_rs::stagewise::workflow::steps::{PlannerStep, ResearcherStep};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Mock Components
// ============================================================================

static PLAN_TEXT: Lazy<String> = Lazy::new(|| {
    [
        "Main Topic: Impact of tariffs on the steel industry",
        "",
        "Subtopics:",
        "1. Steel price changes",
        "2. Downstream manufacturing costs",
        "3. Trade partner retaliation",
        "",
        "Research Questions:",
        "1. How much did domestic steel prices rise?",
        "2. Which manufacturers absorbed the cost?",
        "3. How did trade partners respond?",
    ]
    .join("\n")
});

/// Model that plans or writes depending on the request it receives
struct MockModel {
    calls: AtomicUsize,
}

impl MockModel {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Model for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_content(
        &self,
        history: &[Content],
        _config: Option<&GenerationConfig>,
    ) -> Result<Content, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let request = history.last().map(|c| c.text()).unwrap_or_default();
        if request.starts_with("User Query:") {
            Ok(Content::model(PLAN_TEXT.as_str()))
        } else {
            Ok(Content::model(
                "## Findings\n\nTariffs raised domestic steel prices.",
            ))
        }
    }
}

/// Search returning one hit per query, optionally failing the first calls
struct MockSearch {
    calls: AtomicUsize,
    fail_first: usize,
}

impl MockSearch {
    fn new() -> Self {
        Self::failing_first(0)
    }

    fn failing_first(n: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first: n,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchClient for MockSearch {
    fn name(&self) -> &str {
        "mock_search"
    }

    async fn search(
        &self,
        query: &str,
        _max_results: u32,
    ) -> Result<Vec<SearchHit>, StagewiseError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(StagewiseError::api("mock", "connection reset"));
        }
        Ok(vec![SearchHit {
            content: format!("Result for {}", query),
            source: format!("https://news.example/{}", n),
            score: Some(0.6),
        }])
    }
}

/// Memory store that starts failing after a number of successful saves
struct FlakyStore {
    inner: MemoryCheckpointStore,
    saves: Mutex<usize>,
    fail_after: usize,
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), WorkflowError> {
        {
            let mut saves = self.saves.lock().unwrap();
            if *saves >= self.fail_after {
                return Err(WorkflowError::persistence(&checkpoint.run_id, "disk full"));
            }
            *saves += 1;
        }
        self.inner.save(checkpoint).await
    }

    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>, WorkflowError> {
        self.inner.load(run_id).await
    }

    async fn list(&self) -> Result<Vec<String>, WorkflowError> {
        self.inner.list().await
    }
}

fn collaborators(model: Arc<MockModel>, search: Arc<MockSearch>) -> Collaborators {
    Collaborators {
        model,
        search,
        scorer: Arc::new(ProviderScore),
    }
}

fn service_with(
    search: Arc<MockSearch>,
    store: Arc<dyn CheckpointStore>,
    config: RunConfig,
) -> WorkflowService {
    WorkflowService::new(collaborators(Arc::new(MockModel::new()), search), store, config)
}

fn config(limit: u32) -> RunConfig {
    RunConfig {
        iteration_limit: limit,
        ..RunConfig::default()
    }
}

fn temp_dir() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("stagewise-it-{}", uuid::Uuid::new_v4()))
}

// ============================================================================
// End-to-end
// ============================================================================

#[tokio::test]
async fn test_end_to_end_tariffs_on_steel() {
    let search = Arc::new(MockSearch::new());
    let service = service_with(
        search.clone(),
        Arc::new(MemoryCheckpointStore::new()),
        config(1),
    );

    let handle = service.start("impact of tariffs on steel").await.unwrap();
    let RunResult::Completed { state } = handle.result else {
        panic!("expected completion, got {:?}", handle.result);
    };

    let plan = state.plan().expect("plan written");
    assert!(!plan.subtopics.is_empty());
    assert_eq!(state.iteration_count(), 1);
    assert_eq!(state.findings().len(), search.calls());
    assert!(!state.report().unwrap().is_empty());
    assert_eq!(state.active_stage(), Stage::Done);

    let status = service.status(&handle.run_id).await.unwrap();
    assert_eq!(status.outcome, RunOutcome::Completed);
    assert_eq!(status.stage, Stage::Done);
}

#[tokio::test]
async fn test_research_past_limit_is_noop() {
    let search = Arc::new(MockSearch::new());
    let run_config = RunConfig {
        research_rounds: 3,
        ..config(1)
    };
    let service = service_with(
        search.clone(),
        Arc::new(MemoryCheckpointStore::new()),
        run_config,
    );

    let handle = service.start("impact of tariffs on steel").await.unwrap();
    let RunResult::Completed { state } = handle.result else {
        panic!("expected completion");
    };

    // Only the first round searched: 3 subtopic queries and 3 questions.
    assert_eq!(search.calls(), 6);
    assert_eq!(state.iteration_count(), 1);
}

#[tokio::test]
async fn test_fields_survive_later_steps() {
    let service = service_with(
        Arc::new(MockSearch::new()),
        Arc::new(MemoryCheckpointStore::new()),
        RunConfig {
            interrupt_before: BTreeSet::from([Stage::Researching]),
            ..config(2)
        },
    );

    let handle = service.start("impact of tariffs on steel").await.unwrap();
    let planned = service.status(&handle.run_id).await.unwrap().state;
    let plan_after_planning = planned.plan().cloned().unwrap();

    let RunResult::Completed { state } = service.resume(&handle.run_id, true).await.unwrap()
    else {
        panic!("expected completion");
    };
    assert_eq!(state.plan(), Some(&plan_after_planning));
    assert_eq!(&state.history()[..planned.history().len()], planned.history());
    assert!(state.version() > planned.version());
}

#[tokio::test]
async fn test_plain_output_format() {
    let service = service_with(
        Arc::new(MockSearch::new()),
        Arc::new(MemoryCheckpointStore::new()),
        RunConfig {
            output_format: OutputFormat::Plain,
            ..config(1)
        },
    );

    let handle = service.start("impact of tariffs on steel").await.unwrap();
    let RunResult::Completed { state } = handle.result else {
        panic!("expected completion");
    };
    assert!(state.report().unwrap().starts_with("RESEARCH REPORT"));
}

// ============================================================================
// Interruption
// ============================================================================

#[tokio::test]
async fn test_interrupt_before_research() {
    let search = Arc::new(MockSearch::new());
    let service = service_with(
        search.clone(),
        Arc::new(MemoryCheckpointStore::new()),
        RunConfig {
            interrupt_before: BTreeSet::from([Stage::Researching]),
            ..config(1)
        },
    );

    let handle = service.start("impact of tariffs on steel").await.unwrap();
    assert_eq!(
        handle.result,
        RunResult::AwaitingApproval {
            stage: Stage::Researching
        }
    );

    let status = service.status(&handle.run_id).await.unwrap();
    assert!(status.state.findings().is_empty());
    assert_eq!(status.next_stage, Stage::Researching);
    assert_eq!(search.calls(), 0);

    let unapproved = service.resume(&handle.run_id, false).await.unwrap();
    assert_eq!(unapproved, handle.result);
    assert_eq!(search.calls(), 0);

    let result = service.resume(&handle.run_id, true).await.unwrap();
    let RunResult::Completed { state } = result else {
        panic!("expected completion");
    };
    assert!(!state.findings().is_empty());
    assert!(state.report().is_some());
}

// ============================================================================
// Checkpoints
// ============================================================================

#[tokio::test]
async fn test_resume_from_file_store_in_new_service() {
    let dir = temp_dir();
    let run_config = RunConfig {
        interrupt_before: BTreeSet::from([Stage::Writing]),
        ..config(1)
    };

    let first = service_with(
        Arc::new(MockSearch::new()),
        Arc::new(FileCheckpointStore::new(&dir)),
        run_config,
    );
    let handle = first.start("impact of tariffs on steel").await.unwrap();
    assert_eq!(
        handle.result,
        RunResult::AwaitingApproval {
            stage: Stage::Writing
        }
    );
    drop(first);

    // A fresh process only has the directory.
    let second = service_with(
        Arc::new(MockSearch::new()),
        Arc::new(FileCheckpointStore::new(&dir)),
        RunConfig::default(),
    );
    let result = second.resume(&handle.run_id, true).await.unwrap();
    assert!(result.is_completed());
    assert_eq!(second.list().await.unwrap().len(), 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_checkpoint_round_trip_preserves_next_step_behavior() {
    let model = Arc::new(MockModel::new());
    let ctx = StepContext::new(
        "round-trip",
        collaborators(model, Arc::new(MockSearch::new())),
        Arc::new(config(3)),
    );

    let initial = WorkflowState::new("impact of tariffs on steel", 3);
    let planned = initial
        .merged(PlannerStep.execute(&initial, &ctx).await.unwrap().update)
        .unwrap();

    let json = serde_json::to_string(&planned).unwrap();
    let reloaded: WorkflowState = serde_json::from_str(&json).unwrap();
    assert_eq!(reloaded, planned);

    let from_memory = ResearcherStep.execute(&planned, &ctx).await.unwrap();
    let from_disk = ResearcherStep.execute(&reloaded, &ctx).await.unwrap();
    let a = planned.merged(from_memory.update).unwrap();
    let b = reloaded.merged(from_disk.update).unwrap();

    assert_eq!(a.iteration_count(), b.iteration_count());
    let queries = |s: &WorkflowState| -> Vec<String> {
        s.findings().iter().map(|f| f.query.clone()).collect()
    };
    assert_eq!(queries(&a), queries(&b));
}

#[tokio::test]
async fn test_persistence_failure_fails_run() {
    let store = Arc::new(FlakyStore {
        inner: MemoryCheckpointStore::new(),
        saves: Mutex::new(0),
        fail_after: 2,
    });
    let service = service_with(Arc::new(MockSearch::new()), store.clone(), config(1));

    let handle = service.start("impact of tariffs on steel").await.unwrap();
    assert!(matches!(
        handle.result,
        RunResult::Failed {
            stage: Stage::Researching,
            ..
        }
    ));

    // The research step was never committed.
    let saved = store.load(&handle.run_id).await.unwrap().unwrap();
    assert_eq!(saved.cursor, 1);
    assert_eq!(saved.state.iteration_count(), 0);
}

// ============================================================================
// Step properties
// ============================================================================

#[tokio::test]
async fn test_planning_is_idempotent() {
    let ctx = StepContext::new(
        "idempotent",
        collaborators(Arc::new(MockModel::new()), Arc::new(MockSearch::new())),
        Arc::new(RunConfig::default()),
    );
    let state = WorkflowState::new("impact of tariffs on steel", 5);

    let first = PlannerStep.execute(&state, &ctx).await.unwrap();
    let second = PlannerStep.execute(&state, &ctx).await.unwrap();
    let a = state.merged(first.update).unwrap();
    let b = state.merged(second.update).unwrap();

    let (pa, pb) = (a.plan().unwrap(), b.plan().unwrap());
    assert_eq!(pa.subtopics.len(), pb.subtopics.len());
    assert_eq!(pa.questions.len(), pb.questions.len());
}

#[tokio::test]
async fn test_iteration_cap_holds_across_failed_resumes() {
    // The first search call fails, failing the first research round.
    let search = Arc::new(MockSearch::failing_first(1));
    let service = service_with(
        search,
        Arc::new(MemoryCheckpointStore::new()),
        RunConfig {
            research_rounds: 4,
            ..config(2)
        },
    );

    let handle = service.start("impact of tariffs on steel").await.unwrap();
    let RunResult::Failed { stage, cause } = handle.result else {
        panic!("expected failure");
    };
    assert_eq!(stage, Stage::Researching);
    assert!(cause.contains("connection reset"));

    let mut last_count = 0;
    let mut result = service.resume(&handle.run_id, false).await.unwrap();
    for _ in 0..3 {
        let status = service.status(&handle.run_id).await.unwrap();
        assert!(status.state.iteration_count() >= last_count);
        assert!(status.state.iteration_count() <= 2);
        last_count = status.state.iteration_count();
        if result.is_completed() {
            break;
        }
        result = service.resume(&handle.run_id, false).await.unwrap();
    }

    let RunResult::Completed { state } = result else {
        panic!("expected completion");
    };
    assert_eq!(state.iteration_count(), 2);
}

#[tokio::test]
async fn test_dynamic_update_rejects_unknown_field() {
    let value = serde_json::json!({ "current_agent": "writer" });
    let err = StateUpdate::from_json(&value).unwrap_err();
    assert!(matches!(err, WorkflowError::SchemaViolation { .. }));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let service = Arc::new(service_with(
        Arc::new(MockSearch::new()),
        Arc::new(MemoryCheckpointStore::new()),
        config(1),
    ));

    let a = tokio::spawn({
        let service = service.clone();
        async move { service.start("impact of tariffs on steel").await }
    });
    let b = tokio::spawn({
        let service = service.clone();
        async move { service.start("steel quotas in the EU").await }
    });
    let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

    assert_ne!(a.run_id, b.run_id);
    assert!(a.result.is_completed());
    assert!(b.result.is_completed());

    let status_b = service.status(&b.run_id).await.unwrap();
    assert_eq!(
        status_b.state.initial_query(),
        Some("steel quotas in the EU")
    );
}
