// SPDX-License-Identifier: MIT

//! Durable run snapshots
//!
//! A [`Checkpoint`] is everything needed to pick a run back up: the committed
//! state, the index of the next step, the run's configuration and the
//! approvals recorded so far. Stores are keyed by run id and must not let one
//! run's writes affect another.

pub mod file;
pub mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::state::{Stage, WorkflowState};
use crate::adk::error::WorkflowError;
use crate::stagewise::config::RunConfig;

/// Last known outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Pending,
    AwaitingApproval { stage: Stage },
    Completed,
    Failed { stage: Stage, cause: String },
}

impl RunOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunOutcome::Completed | RunOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub state: WorkflowState,
    /// Index of the next step to run
    pub cursor: usize,
    pub config: RunConfig,
    /// Step indices approved to run past an interruption point
    #[serde(default)]
    pub approvals: BTreeSet<usize>,
    /// The previous step asked to pause before the step at `cursor`
    #[serde(default)]
    pub interrupt_requested: bool,
    pub outcome: RunOutcome,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Checkpoint for a run that has not executed any step yet
    pub fn initial(run_id: impl Into<String>, state: WorkflowState, config: RunConfig) -> Self {
        Self {
            run_id: run_id.into(),
            state,
            cursor: 0,
            config,
            approvals: BTreeSet::new(),
            interrupt_requested: false,
            outcome: RunOutcome::Pending,
            saved_at: Utc::now(),
        }
    }
}

/// Storage for run checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    fn name(&self) -> &str;

    /// Persist `checkpoint`, replacing any previous one for the run.
    ///
    /// Must not return `Ok` before the write is durable.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), WorkflowError>;

    /// Latest checkpoint for `run_id`, if any
    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>, WorkflowError>;

    /// Ids of every stored run
    async fn list(&self) -> Result<Vec<String>, WorkflowError>;
}

/// Run ids become file names, so keep them to a safe alphabet
pub fn validate_run_id(run_id: &str) -> Result<(), WorkflowError> {
    let valid = !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(WorkflowError::persistence(run_id, "invalid run id"))
    }
}
