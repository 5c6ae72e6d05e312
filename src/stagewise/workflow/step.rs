// SPDX-License-Identifier: MIT

//! Step contract
//!
//! A step reads a snapshot of the state, talks to its collaborators through
//! the [`StepContext`] and returns a [`StepOutcome`]. It never raises raw
//! collaborator errors: every failure leaves the step as a [`StepFailure`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::runner::RunEvent;
use super::state::{Stage, StateUpdate, WorkflowState};
use crate::adk::error::StepFailure;
use crate::adk::model::{Content, GenerationConfig, Model};
use crate::stagewise::config::RunConfig;
use crate::stagewise::tools::scoring::RelevanceScorer;
use crate::stagewise::tools::search::{SearchClient, SearchHit};

/// What the runner should do once the update is committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSignal {
    Continue,
    /// Pause for approval before the next step
    Interrupt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub update: StateUpdate,
    pub signal: StepSignal,
}

impl StepOutcome {
    pub fn proceed(update: StateUpdate) -> Self {
        Self {
            update,
            signal: StepSignal::Continue,
        }
    }

    pub fn interrupt(update: StateUpdate) -> Self {
        Self {
            update,
            signal: StepSignal::Interrupt,
        }
    }
}

/// Core trait for pipeline steps
#[async_trait]
pub trait Step: Send + Sync {
    /// Stage this step owns
    fn stage(&self) -> Stage;

    fn name(&self) -> &str {
        self.stage().as_str()
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        ctx: &StepContext,
    ) -> Result<StepOutcome, StepFailure>;
}

/// External collaborators shared by every run
#[derive(Clone)]
pub struct Collaborators {
    pub model: Arc<dyn Model>,
    pub search: Arc<dyn SearchClient>,
    pub scorer: Arc<dyn RelevanceScorer>,
}

/// Everything a step may use besides the state
#[derive(Clone)]
pub struct StepContext {
    pub run_id: String,
    pub collaborators: Collaborators,
    pub config: Arc<RunConfig>,
    events: Option<mpsc::Sender<RunEvent>>,
}

impl StepContext {
    pub fn new(
        run_id: impl Into<String>,
        collaborators: Collaborators,
        config: Arc<RunConfig>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            collaborators,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn scorer(&self) -> &dyn RelevanceScorer {
        self.collaborators.scorer.as_ref()
    }

    /// Forward an event to the trace sink, if one is attached
    pub async fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Invoke the model with the call timeout applied and return its text
    pub async fn call_model(
        &self,
        stage: Stage,
        history: &[Content],
        config: Option<&GenerationConfig>,
    ) -> Result<String, StepFailure> {
        let call = self.collaborators.model.generate_content(history, config);
        match tokio::time::timeout(self.config.call_timeout(), call).await {
            Ok(Ok(content)) => Ok(content.text()),
            Ok(Err(e)) => Err(StepFailure::new(
                stage.as_str(),
                format!("model '{}' failed: {}", self.collaborators.model.name(), e),
            )),
            Err(_) => Err(StepFailure::new(
                stage.as_str(),
                format!(
                    "model call timed out after {}s",
                    self.config.call_timeout_secs
                ),
            )),
        }
    }

    /// Run one search with the call timeout applied
    pub async fn search(&self, stage: Stage, query: &str) -> Result<Vec<SearchHit>, StepFailure> {
        let client = &self.collaborators.search;
        let call = client.search(query, self.config.max_search_results);
        match tokio::time::timeout(self.config.call_timeout(), call).await {
            Ok(Ok(hits)) => Ok(hits),
            Ok(Err(e)) => Err(StepFailure::new(
                stage.as_str(),
                format!("{} failed for '{}': {}", client.name(), query, e),
            )),
            Err(_) => Err(StepFailure::new(
                stage.as_str(),
                format!(
                    "{} timed out after {}s for '{}'",
                    client.name(),
                    self.config.call_timeout_secs,
                    query
                ),
            )),
        }
    }
}
