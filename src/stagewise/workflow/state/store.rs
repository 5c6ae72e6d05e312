// SPDX-License-Identifier: MIT

//! Runtime state threaded through a run

use serde::{Deserialize, Serialize};

use super::schema::{Finding, ResearchPlan, Role, Stage, Turn};
use super::update::{FieldUpdate, StateUpdate};
use crate::adk::error::WorkflowError;

/// The single record passed from step to step.
///
/// Steps only ever see `&WorkflowState`; the runner replaces its copy with
/// the result of [`WorkflowState::merged`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    history: Vec<Turn>,
    plan: Option<ResearchPlan>,
    findings: Vec<Finding>,
    iteration_count: u32,
    iteration_limit: u32,
    report: Option<String>,
    active_stage: Stage,
    /// Bumped on every non-empty merge
    version: u64,
}

impl WorkflowState {
    /// Fresh state for a run started from `query`
    pub fn new(query: impl Into<String>, iteration_limit: u32) -> Self {
        Self {
            history: vec![Turn::user(query)],
            plan: None,
            findings: Vec::new(),
            iteration_count: 0,
            iteration_limit,
            report: None,
            active_stage: Stage::Planning,
            version: 0,
        }
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn plan(&self) -> Option<&ResearchPlan> {
        self.plan.as_ref()
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn iteration_limit(&self) -> u32 {
        self.iteration_limit
    }

    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }

    pub fn active_stage(&self) -> Stage {
        self.active_stage
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_finalized(&self) -> bool {
        self.active_stage == Stage::Done
    }

    /// Whether the research cap has been reached
    pub fn iterations_exhausted(&self) -> bool {
        self.iteration_count >= self.iteration_limit
    }

    /// The query the run was started with
    pub fn initial_query(&self) -> Option<&str> {
        self.history
            .iter()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }

    /// The most recent user turn
    pub fn latest_query(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }

    /// Fold `update` into a copy of this state.
    ///
    /// All-or-nothing: either every field applies or the state is returned
    /// untouched inside the error. Fields absent from the update keep their
    /// values.
    pub fn merged(&self, update: StateUpdate) -> Result<WorkflowState, WorkflowError> {
        if update.is_empty() {
            return Ok(self.clone());
        }

        update.validate()?;
        self.check_against(&update)?;

        let mut next = self.clone();
        for field in update.into_fields() {
            log::debug!(
                "Merging field '{}' ({:?})",
                field.field().name(),
                field.field().reducer()
            );
            next.apply(field);
        }
        next.version += 1;
        Ok(next)
    }

    /// Checks that depend on the state the update lands on
    fn check_against(&self, update: &StateUpdate) -> Result<(), WorkflowError> {
        if self.is_finalized() {
            return Err(WorkflowError::schema(
                "active_stage",
                "state is finalized and accepts no further updates",
            ));
        }

        let mut has_plan = self.plan.is_some();
        let mut count = u64::from(self.iteration_count);

        for field in update.fields() {
            match field {
                FieldUpdate::Plan(_) => has_plan = true,
                FieldUpdate::IterationDelta(delta) => count += u64::from(*delta),
                _ => {}
            }
        }

        for field in update.fields() {
            match field {
                FieldUpdate::Findings(_) | FieldUpdate::IterationDelta(_) if !has_plan => {
                    return Err(WorkflowError::schema(
                        field.field().name(),
                        "research output supplied before a plan exists",
                    ));
                }
                FieldUpdate::IterationDelta(_) if count > u64::from(self.iteration_limit) => {
                    return Err(WorkflowError::schema(
                        field.field().name(),
                        format!(
                            "iteration_count would reach {} past the limit of {}",
                            count, self.iteration_limit
                        ),
                    ));
                }
                FieldUpdate::Report(_) if count == 0 => {
                    return Err(WorkflowError::schema(
                        field.field().name(),
                        "report written before any research iteration",
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, field: FieldUpdate) {
        match field {
            FieldUpdate::History(turns) => self.history.extend(turns),
            FieldUpdate::Plan(plan) => self.plan = Some(plan),
            FieldUpdate::Findings(findings) => self.findings.extend(findings),
            FieldUpdate::IterationDelta(delta) => self.iteration_count += delta,
            FieldUpdate::Report(report) => self.report = Some(report),
            FieldUpdate::ActiveStage(stage) => self.active_stage = stage,
        }
    }
}
