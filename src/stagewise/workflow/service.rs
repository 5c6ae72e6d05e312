// SPDX-License-Identifier: MIT

//! Run control surface: start, resume, status
//!
//! Calls on the same run id are serialized; different runs never contend.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

use super::checkpoint::{validate_run_id, Checkpoint, CheckpointStore, RunOutcome};
use super::runner::{RunEvent, RunResult, Runner};
use super::state::{Stage, WorkflowState};
use super::step::Collaborators;
use super::steps::research_pipeline;
use crate::adk::error::WorkflowError;
use crate::stagewise::config::RunConfig;

/// Result of starting a run
#[derive(Debug, Clone, Serialize)]
pub struct RunHandle {
    pub run_id: String,
    pub result: RunResult,
}

/// Durable view of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: String,
    /// Stage that last wrote the state
    pub stage: Stage,
    /// Stage of the next step, `done` when none remain
    pub next_stage: Stage,
    pub cursor: usize,
    pub outcome: RunOutcome,
    pub state: WorkflowState,
    pub updated_at: DateTime<Utc>,
}

type RunLocks = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Exclusive hold on one run id.
///
/// The lock entry is pruned on release once no other caller holds or waits on it.
struct RunGuard {
    run_id: String,
    locks: RunLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        if locks
            .get(&self.run_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.run_id);
        }
    }
}

pub struct WorkflowService {
    collaborators: Collaborators,
    store: Arc<dyn CheckpointStore>,
    defaults: RunConfig,
    locks: RunLocks,
}

impl WorkflowService {
    pub fn new(
        collaborators: Collaborators,
        store: Arc<dyn CheckpointStore>,
        defaults: RunConfig,
    ) -> Self {
        Self {
            collaborators,
            store,
            defaults,
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn defaults(&self) -> &RunConfig {
        &self.defaults
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    fn runner(&self, config: &RunConfig) -> Runner {
        Runner::new(
            research_pipeline(config.research_rounds),
            self.store.clone(),
            self.collaborators.clone(),
        )
    }

    async fn acquire(&self, run_id: &str) -> RunGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(run_id.to_string()).or_default().clone()
        };
        RunGuard {
            run_id: run_id.to_string(),
            locks: self.locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Create and persist the initial checkpoint of a new run.
    ///
    /// The run is locked before its id becomes visible in the store.
    async fn create(
        &self,
        query: &str,
        config: RunConfig,
    ) -> Result<(Checkpoint, RunGuard), WorkflowError> {
        config.validate()?;
        if query.trim().is_empty() {
            return Err(WorkflowError::InvalidConfig("query must not be empty".into()));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let guard = self.acquire(&run_id).await;
        let state = WorkflowState::new(query.trim(), config.iteration_limit);
        let checkpoint = Checkpoint::initial(run_id.clone(), state, config);
        self.store.save(&checkpoint).await?;
        log::info!("Run '{}' created for query: {}", run_id, query.trim());
        Ok((checkpoint, guard))
    }

    /// Start a run with the service defaults
    pub async fn start(&self, query: &str) -> Result<RunHandle, WorkflowError> {
        self.start_with(query, self.defaults.clone()).await
    }

    /// Start a run with an explicit configuration
    pub async fn start_with(
        &self,
        query: &str,
        config: RunConfig,
    ) -> Result<RunHandle, WorkflowError> {
        let (checkpoint, _guard) = self.create(query, config).await?;
        let run_id = checkpoint.run_id.clone();
        let result = self.runner(&checkpoint.config).drive(checkpoint).await;
        Ok(RunHandle { run_id, result })
    }

    /// Start a run in the background and stream its events.
    ///
    /// The receiver closes once the run stops.
    pub async fn start_streaming(
        self: &Arc<Self>,
        query: &str,
        config: RunConfig,
    ) -> Result<(String, mpsc::Receiver<RunEvent>), WorkflowError> {
        let (checkpoint, guard) = self.create(query, config).await?;
        let run_id = checkpoint.run_id.clone();
        let (tx, rx) = mpsc::channel(100);

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            let runner = service.runner(&checkpoint.config).with_events(tx);
            runner.drive(checkpoint).await;
        });

        Ok((run_id, rx))
    }

    /// Continue a run from its last durable checkpoint.
    ///
    /// `approved` releases a run parked at an interruption point. Failed
    /// runs are retried from the step that failed.
    pub async fn resume(&self, run_id: &str, approved: bool) -> Result<RunResult, WorkflowError> {
        validate_run_id(run_id).map_err(|_| WorkflowError::NotFound(run_id.to_string()))?;
        let _guard = self.acquire(run_id).await;

        let mut checkpoint = self
            .store
            .load(run_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(run_id.to_string()))?;

        match checkpoint.outcome.clone() {
            RunOutcome::Completed => {
                log::info!("Run '{}' already completed", run_id);
                return Ok(RunResult::Completed {
                    state: checkpoint.state,
                });
            }
            RunOutcome::AwaitingApproval { stage } if !approved => {
                log::info!("Run '{}' still awaiting approval before '{}'", run_id, stage);
                return Ok(RunResult::AwaitingApproval { stage });
            }
            RunOutcome::AwaitingApproval { stage } => {
                log::info!("Run '{}' approved to run '{}'", run_id, stage);
                checkpoint.approvals.insert(checkpoint.cursor);
                checkpoint.outcome = RunOutcome::Pending;
                checkpoint.saved_at = Utc::now();
                self.store.save(&checkpoint).await?;
            }
            RunOutcome::Failed { stage, cause } => {
                log::warn!(
                    "Retrying run '{}' from '{}' after failure: {}",
                    run_id,
                    stage,
                    cause
                );
                checkpoint.outcome = RunOutcome::Pending;
            }
            RunOutcome::Pending => {}
        }

        Ok(self.runner(&checkpoint.config).drive(checkpoint).await)
    }

    /// Last durable view of a run
    pub async fn status(&self, run_id: &str) -> Result<RunStatus, WorkflowError> {
        run_status(self.store.as_ref(), run_id).await
    }

    /// Status of every stored run
    pub async fn list(&self) -> Result<Vec<RunStatus>, WorkflowError> {
        list_runs(self.store.as_ref()).await
    }
}

/// Read a run's status straight from a store, without model or search clients
pub async fn run_status(
    store: &dyn CheckpointStore,
    run_id: &str,
) -> Result<RunStatus, WorkflowError> {
    validate_run_id(run_id).map_err(|_| WorkflowError::NotFound(run_id.to_string()))?;
    let checkpoint = store
        .load(run_id)
        .await?
        .ok_or_else(|| WorkflowError::NotFound(run_id.to_string()))?;
    Ok(RunStatus::from(checkpoint))
}

pub async fn list_runs(store: &dyn CheckpointStore) -> Result<Vec<RunStatus>, WorkflowError> {
    let mut runs = Vec::new();
    for run_id in store.list().await? {
        if let Some(checkpoint) = store.load(&run_id).await? {
            runs.push(RunStatus::from(checkpoint));
        }
    }
    Ok(runs)
}

impl From<Checkpoint> for RunStatus {
    fn from(checkpoint: Checkpoint) -> Self {
        let next_stage = research_pipeline(checkpoint.config.research_rounds)
            .get(checkpoint.cursor)
            .map(|s| s.stage())
            .unwrap_or(Stage::Done);
        RunStatus {
            run_id: checkpoint.run_id,
            stage: checkpoint.state.active_stage(),
            next_stage,
            cursor: checkpoint.cursor,
            outcome: checkpoint.outcome,
            state: checkpoint.state,
            updated_at: checkpoint.saved_at,
        }
    }
}
