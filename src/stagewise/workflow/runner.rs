// SPDX-License-Identifier: MIT

//! Runner - drives the fixed step sequence over a checkpoint
//!
//! Phases follow `Pending(i) -> [AwaitingApproval(i)] -> Running(i) ->
//! Pending(i + 1) | Completed`, with `Failed` reachable from `Running`.
//! A step's update is merged and the resulting checkpoint saved before the
//! cursor moves, so a crash can only repeat the last step, never skip it.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::checkpoint::{Checkpoint, CheckpointStore, RunOutcome};
use super::state::{Stage, WorkflowState};
use super::step::{Collaborators, Step, StepContext, StepSignal};

/// Events emitted while a run advances
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    StepStarted {
        run_id: String,
        index: usize,
        stage: Stage,
    },
    /// Free-form progress reported by a step while it runs
    StepProgress {
        run_id: String,
        stage: Stage,
        message: String,
    },
    StepCompleted {
        run_id: String,
        index: usize,
        stage: Stage,
        version: u64,
    },
    AwaitingApproval {
        run_id: String,
        index: usize,
        stage: Stage,
    },
    Completed {
        run_id: String,
    },
    Failed {
        run_id: String,
        stage: Stage,
        cause: String,
    },
}

/// Position of a run in the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum RunPhase {
    Pending(usize),
    AwaitingApproval(usize),
    Running(usize),
    Completed,
    Failed { index: usize, cause: String },
}

/// What a caller gets back from `start` or `resume`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResult {
    Completed { state: WorkflowState },
    AwaitingApproval { stage: Stage },
    Failed { stage: Stage, cause: String },
}

impl RunResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunResult::Completed { .. })
    }
}

pub struct Runner {
    steps: Vec<Arc<dyn Step>>,
    store: Arc<dyn CheckpointStore>,
    collaborators: Collaborators,
    events: Option<mpsc::Sender<RunEvent>>,
}

impl Runner {
    pub fn new(
        steps: Vec<Arc<dyn Step>>,
        store: Arc<dyn CheckpointStore>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            steps,
            store,
            collaborators,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    /// Stage of the step at `index`, or `Done` past the end
    pub fn stage_at(&self, index: usize) -> Stage {
        self.steps
            .get(index)
            .map(|s| s.stage())
            .unwrap_or(Stage::Done)
    }

    async fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Advance `checkpoint` until the run completes, fails or must wait for
    /// approval. Approvals must already be recorded on the checkpoint.
    pub async fn drive(&self, mut checkpoint: Checkpoint) -> RunResult {
        let run_id = checkpoint.run_id.clone();
        let mut ctx = StepContext::new(
            run_id.clone(),
            self.collaborators.clone(),
            Arc::new(checkpoint.config.clone()),
        );
        if let Some(tx) = &self.events {
            ctx = ctx.with_events(tx.clone());
        }

        let mut phase = RunPhase::Pending(checkpoint.cursor);
        loop {
            log::debug!("Run '{}' phase {:?}", run_id, phase);
            phase = match phase {
                RunPhase::Pending(i) if i >= self.steps.len() => RunPhase::Completed,
                RunPhase::Pending(i) => {
                    let stage = self.stage_at(i);
                    let gated = checkpoint.interrupt_requested
                        || checkpoint.config.interrupt_before.contains(&stage);
                    if gated && !checkpoint.approvals.contains(&i) {
                        RunPhase::AwaitingApproval(i)
                    } else {
                        RunPhase::Running(i)
                    }
                }
                RunPhase::AwaitingApproval(i) => {
                    let stage = self.stage_at(i);
                    log::info!("Run '{}' awaiting approval before '{}'", run_id, stage);
                    checkpoint.outcome = RunOutcome::AwaitingApproval { stage };
                    checkpoint.saved_at = Utc::now();
                    if let Err(e) = self.store.save(&checkpoint).await {
                        RunPhase::Failed {
                            index: i,
                            cause: e.to_string(),
                        }
                    } else {
                        self.emit(RunEvent::AwaitingApproval {
                            run_id: run_id.clone(),
                            index: i,
                            stage,
                        })
                        .await;
                        return RunResult::AwaitingApproval { stage };
                    }
                }
                RunPhase::Running(i) => match self.run_step(i, &checkpoint, &ctx).await {
                    Ok(committed) => {
                        checkpoint = committed;
                        if checkpoint.cursor >= self.steps.len() {
                            RunPhase::Completed
                        } else {
                            RunPhase::Pending(checkpoint.cursor)
                        }
                    }
                    Err(cause) => RunPhase::Failed { index: i, cause },
                },
                RunPhase::Completed => {
                    if checkpoint.outcome != RunOutcome::Completed {
                        checkpoint.outcome = RunOutcome::Completed;
                        checkpoint.saved_at = Utc::now();
                        if let Err(e) = self.store.save(&checkpoint).await {
                            log::error!("Run '{}' completion marker not saved: {}", run_id, e);
                        }
                    }
                    log::info!("Run '{}' completed", run_id);
                    self.emit(RunEvent::Completed {
                        run_id: run_id.clone(),
                    })
                    .await;
                    return RunResult::Completed {
                        state: checkpoint.state,
                    };
                }
                RunPhase::Failed { index, cause } => {
                    let stage = self.stage_at(index);
                    log::error!("Run '{}' failed at '{}': {}", run_id, stage, cause);
                    // Marker only: committed state and cursor stay as they were.
                    checkpoint.outcome = RunOutcome::Failed {
                        stage,
                        cause: cause.clone(),
                    };
                    checkpoint.saved_at = Utc::now();
                    if let Err(e) = self.store.save(&checkpoint).await {
                        log::error!("Run '{}' failure marker not saved: {}", run_id, e);
                    }
                    self.emit(RunEvent::Failed {
                        run_id: run_id.clone(),
                        stage,
                        cause: cause.clone(),
                    })
                    .await;
                    return RunResult::Failed { stage, cause };
                }
            };
        }
    }

    /// Execute step `i`, merge its update and persist the next checkpoint.
    ///
    /// Returns the committed checkpoint, or the failure cause. Nothing is
    /// committed unless the save succeeds.
    async fn run_step(
        &self,
        i: usize,
        checkpoint: &Checkpoint,
        ctx: &StepContext,
    ) -> Result<Checkpoint, String> {
        let step = &self.steps[i];
        let stage = step.stage();
        log::info!(
            "Run '{}' step {} ({}) starting",
            checkpoint.run_id,
            i,
            step.name()
        );
        self.emit(RunEvent::StepStarted {
            run_id: checkpoint.run_id.clone(),
            index: i,
            stage,
        })
        .await;

        let outcome = step
            .execute(&checkpoint.state, ctx)
            .await
            .map_err(|failure| failure.cause)?;
        let state = checkpoint
            .state
            .merged(outcome.update)
            .map_err(|e| e.to_string())?;

        let mut committed = checkpoint.clone();
        committed.state = state;
        committed.cursor = i + 1;
        committed.interrupt_requested = outcome.signal == StepSignal::Interrupt;
        committed.outcome = if committed.cursor >= self.steps.len() {
            RunOutcome::Completed
        } else {
            RunOutcome::Pending
        };
        committed.saved_at = Utc::now();

        self.store
            .save(&committed)
            .await
            .map_err(|e| e.to_string())?;

        log::info!(
            "Run '{}' step {} ({}) committed at version {}",
            committed.run_id,
            i,
            step.name(),
            committed.state.version()
        );
        self.emit(RunEvent::StepCompleted {
            run_id: committed.run_id.clone(),
            index: i,
            stage,
            version: committed.state.version(),
        })
        .await;
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::{StepFailure, WorkflowError};
    use crate::stagewise::config::RunConfig;
    use crate::stagewise::tools::search::StubSearchClient;
    use crate::stagewise::workflow::checkpoint::MemoryCheckpointStore;
    use crate::stagewise::workflow::state::{ResearchPlan, StateUpdate};
    use crate::stagewise::workflow::step::StepOutcome;
    use crate::stagewise::workflow::steps::testing::{collaborators, ScriptedModel};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    type Behavior = fn(&WorkflowState) -> Result<StepOutcome, StepFailure>;

    struct FnStep {
        stage: Stage,
        behavior: Behavior,
    }

    #[async_trait]
    impl Step for FnStep {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn execute(
            &self,
            state: &WorkflowState,
            _ctx: &StepContext,
        ) -> Result<StepOutcome, StepFailure> {
            (self.behavior)(state)
        }
    }

    fn plan_ok(_: &WorkflowState) -> Result<StepOutcome, StepFailure> {
        Ok(StepOutcome::proceed(StateUpdate::empty().plan(ResearchPlan {
            main_topic: "steel".into(),
            subtopics: vec!["prices".into()],
            questions: vec![],
        })))
    }

    fn plan_then_interrupt(state: &WorkflowState) -> Result<StepOutcome, StepFailure> {
        Ok(StepOutcome::interrupt(plan_ok(state)?.update))
    }

    fn research_ok(state: &WorkflowState) -> Result<StepOutcome, StepFailure> {
        if state.iterations_exhausted() {
            return Ok(StepOutcome::proceed(StateUpdate::empty()));
        }
        Ok(StepOutcome::proceed(
            StateUpdate::empty()
                .count_iteration()
                .stage(Stage::Researching),
        ))
    }

    fn research_fails(_: &WorkflowState) -> Result<StepOutcome, StepFailure> {
        Err(StepFailure::new("researching", "search timed out"))
    }

    fn write_ok(_: &WorkflowState) -> Result<StepOutcome, StepFailure> {
        Ok(StepOutcome::proceed(
            StateUpdate::empty().report("done").stage(Stage::Done),
        ))
    }

    fn step(stage: Stage, behavior: Behavior) -> Arc<dyn Step> {
        Arc::new(FnStep { stage, behavior })
    }

    fn pipeline(research: Behavior) -> Vec<Arc<dyn Step>> {
        vec![
            step(Stage::Planning, plan_ok),
            step(Stage::Researching, research),
            step(Stage::Writing, write_ok),
        ]
    }

    fn runner(steps: Vec<Arc<dyn Step>>, store: Arc<dyn CheckpointStore>) -> Runner {
        let collab = collaborators(
            Arc::new(ScriptedModel::repeating("unused")),
            Arc::new(StubSearchClient),
        );
        Runner::new(steps, store, collab)
    }

    fn fresh(config: RunConfig) -> Checkpoint {
        let state = WorkflowState::new("impact of tariffs on steel", config.iteration_limit);
        Checkpoint::initial("run-1", state, config)
    }

    /// Records every saved cursor, optionally failing from a given save on
    struct RecordingStore {
        inner: MemoryCheckpointStore,
        cursors: Mutex<Vec<usize>>,
        fail_from: Option<usize>,
    }

    impl RecordingStore {
        fn new(fail_from: Option<usize>) -> Self {
            Self {
                inner: MemoryCheckpointStore::new(),
                cursors: Mutex::new(Vec::new()),
                fail_from,
            }
        }
    }

    #[async_trait]
    impl CheckpointStore for RecordingStore {
        fn name(&self) -> &str {
            "recording"
        }

        async fn save(&self, checkpoint: &Checkpoint) -> Result<(), WorkflowError> {
            {
                let mut cursors = self.cursors.lock().unwrap();
                if self.fail_from.is_some_and(|n| cursors.len() >= n) {
                    return Err(WorkflowError::persistence(&checkpoint.run_id, "disk full"));
                }
                cursors.push(checkpoint.cursor);
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

    #[tokio::test]
    async fn test_runs_to_completion_with_checkpoint_per_step() {
        let store = Arc::new(RecordingStore::new(None));
        let runner = runner(pipeline(research_ok), store.clone());

        let result = runner.drive(fresh(RunConfig::default())).await;
        let RunResult::Completed { state } = result else {
            panic!("expected completion, got {:?}", result);
        };
        assert_eq!(state.report(), Some("done"));
        assert_eq!(state.iteration_count(), 1);
        assert_eq!(*store.cursors.lock().unwrap(), vec![1, 2, 3]);

        let saved = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(saved.cursor, 3);
        assert_eq!(saved.outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_interrupt_before_stage_waits_for_approval() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let runner = runner(pipeline(research_ok), store.clone());
        let config = RunConfig {
            interrupt_before: BTreeSet::from([Stage::Researching]),
            ..RunConfig::default()
        };

        let result = runner.drive(fresh(config)).await;
        assert_eq!(
            result,
            RunResult::AwaitingApproval {
                stage: Stage::Researching
            }
        );
        let saved = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(saved.cursor, 1);
        assert!(saved.state.plan().is_some());
        assert_eq!(saved.state.iteration_count(), 0);

        // Without an approval the run stays parked.
        let again = runner.drive(saved.clone()).await;
        assert!(matches!(again, RunResult::AwaitingApproval { .. }));

        let mut approved = store.load("run-1").await.unwrap().unwrap();
        approved.approvals.insert(1);
        assert!(runner.drive(approved).await.is_completed());
    }

    #[tokio::test]
    async fn test_step_interrupt_signal_pauses_next_step() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let steps = vec![
            step(Stage::Planning, plan_then_interrupt),
            step(Stage::Researching, research_ok),
            step(Stage::Writing, write_ok),
        ];
        let runner = runner(steps, store.clone());

        let result = runner.drive(fresh(RunConfig::default())).await;
        assert_eq!(
            result,
            RunResult::AwaitingApproval {
                stage: Stage::Researching
            }
        );

        let mut saved = store.load("run-1").await.unwrap().unwrap();
        assert!(saved.interrupt_requested);
        assert!(saved.state.plan().is_some());
        saved.approvals.insert(1);
        assert!(runner.drive(saved).await.is_completed());
    }

    #[tokio::test]
    async fn test_step_failure_keeps_committed_checkpoint() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let runner = runner(pipeline(research_fails), store.clone());

        let result = runner.drive(fresh(RunConfig::default())).await;
        assert_eq!(
            result,
            RunResult::Failed {
                stage: Stage::Researching,
                cause: "search timed out".into()
            }
        );

        let saved = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(saved.cursor, 1);
        assert!(saved.state.plan().is_some());
        assert!(matches!(saved.outcome, RunOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_schema_violation_fails_run() {
        fn early_report(_: &WorkflowState) -> Result<StepOutcome, StepFailure> {
            Ok(StepOutcome::proceed(StateUpdate::empty().report("too early")))
        }
        let store = Arc::new(MemoryCheckpointStore::new());
        let runner = runner(pipeline(early_report), store);

        let result = runner.drive(fresh(RunConfig::default())).await;
        let RunResult::Failed { stage, cause } = result else {
            panic!("expected failure");
        };
        assert_eq!(stage, Stage::Researching);
        assert!(cause.contains("Schema violation"));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_not_reported_as_committed() {
        let store = Arc::new(RecordingStore::new(Some(1)));
        let runner = runner(pipeline(research_ok), store.clone());

        let result = runner.drive(fresh(RunConfig::default())).await;
        let RunResult::Failed { stage, cause } = result else {
            panic!("expected failure");
        };
        assert_eq!(stage, Stage::Researching);
        assert!(cause.contains("disk full"));

        let saved = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(saved.cursor, 1);
        assert_eq!(saved.state.iteration_count(), 0);
    }

    #[tokio::test]
    async fn test_events_are_streamed() {
        let (tx, mut rx) = mpsc::channel(32);
        let runner = runner(
            pipeline(research_ok),
            Arc::new(MemoryCheckpointStore::new()),
        )
        .with_events(tx);

        assert!(runner.drive(fresh(RunConfig::default())).await.is_completed());
        drop(runner);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 7);
        assert!(matches!(
            events[0],
            RunEvent::StepStarted {
                stage: Stage::Planning,
                ..
            }
        ));
        assert!(matches!(events[6], RunEvent::Completed { .. }));
    }

    #[tokio::test]
    async fn test_completed_checkpoint_returns_immediately() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let runner = runner(pipeline(research_fails), store);
        let mut cp = fresh(RunConfig::default());
        cp.cursor = 3;

        assert!(runner.drive(cp).await.is_completed());
    }
}
