// SPDX-License-Identifier: MIT

//! Partial state updates
//!
//! A step never mutates state directly. It returns a `StateUpdate`: a closed
//! set of field variants, each carrying only the value (or slice, or delta)
//! the step intends to contribute.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use super::schema::{Finding, ResearchPlan, Stage, StateField, Turn};
use crate::adk::error::WorkflowError;

/// One field of a partial update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldUpdate {
    /// Turns to append
    History(Vec<Turn>),
    /// Plan replacing the current one
    Plan(ResearchPlan),
    /// Findings to append
    Findings(Vec<Finding>),
    /// Amount added to the iteration counter
    IterationDelta(u32),
    Report(String),
    ActiveStage(Stage),
}

impl FieldUpdate {
    pub fn field(&self) -> StateField {
        match self {
            FieldUpdate::History(_) => StateField::History,
            FieldUpdate::Plan(_) => StateField::Plan,
            FieldUpdate::Findings(_) => StateField::Findings,
            FieldUpdate::IterationDelta(_) => StateField::IterationCount,
            FieldUpdate::Report(_) => StateField::Report,
            FieldUpdate::ActiveStage(_) => StateField::ActiveStage,
        }
    }
}

/// Sparse set of field updates produced by one step invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    fields: Vec<FieldUpdate>,
}

impl StateUpdate {
    /// The no-op update
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldUpdate] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<FieldUpdate> {
        self.fields
    }

    pub fn contains(&self, field: StateField) -> bool {
        self.fields.iter().any(|f| f.field() == field)
    }

    pub fn push(mut self, update: FieldUpdate) -> Self {
        self.fields.push(update);
        self
    }

    pub fn append_history(self, turn: Turn) -> Self {
        self.push(FieldUpdate::History(vec![turn]))
    }

    pub fn plan(self, plan: ResearchPlan) -> Self {
        self.push(FieldUpdate::Plan(plan))
    }

    pub fn append_findings(self, findings: Vec<Finding>) -> Self {
        self.push(FieldUpdate::Findings(findings))
    }

    /// Increment the iteration counter by one
    pub fn count_iteration(self) -> Self {
        self.push(FieldUpdate::IterationDelta(1))
    }

    pub fn report(self, report: impl Into<String>) -> Self {
        self.push(FieldUpdate::Report(report.into()))
    }

    pub fn stage(self, stage: Stage) -> Self {
        self.push(FieldUpdate::ActiveStage(stage))
    }

    /// Static structural checks that do not depend on the target state
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut seen = HashSet::new();
        for update in &self.fields {
            let field = update.field();
            if !seen.insert(field) {
                return Err(WorkflowError::schema(
                    field.name(),
                    "field supplied more than once in a single update",
                ));
            }

            match update {
                FieldUpdate::Plan(plan) if plan.main_topic.trim().is_empty() => {
                    return Err(WorkflowError::schema(field.name(), "main_topic is empty"));
                }
                FieldUpdate::Findings(findings) => {
                    if let Some(bad) = findings
                        .iter()
                        .find(|f| !(0.0..=1.0).contains(&f.relevance))
                    {
                        return Err(WorkflowError::schema(
                            field.name(),
                            format!(
                                "relevance {} for query '{}' is outside [0, 1]",
                                bad.relevance, bad.query
                            ),
                        ));
                    }
                }
                FieldUpdate::Report(report) if report.trim().is_empty() => {
                    return Err(WorkflowError::schema(field.name(), "report is empty"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Build an update from a dynamic `{field: value}` map.
    ///
    /// Unknown keys and values of the wrong shape are rejected instead of
    /// coerced. `iteration_count` is read as a delta.
    pub fn from_json(value: &Value) -> Result<Self, WorkflowError> {
        let obj = value
            .as_object()
            .ok_or_else(|| WorkflowError::schema("<update>", "update must be a JSON object"))?;

        let mut update = StateUpdate::empty();
        for (key, raw) in obj {
            let field: StateField = key
                .parse()
                .map_err(|e: String| WorkflowError::schema(key.as_str(), e))?;

            let mismatch = |e: serde_json::Error| WorkflowError::schema(field.name(), e.to_string());

            let parsed = match field {
                StateField::History => {
                    FieldUpdate::History(serde_json::from_value(raw.clone()).map_err(mismatch)?)
                }
                StateField::Plan => {
                    FieldUpdate::Plan(serde_json::from_value(raw.clone()).map_err(mismatch)?)
                }
                StateField::Findings => {
                    FieldUpdate::Findings(serde_json::from_value(raw.clone()).map_err(mismatch)?)
                }
                StateField::IterationCount => FieldUpdate::IterationDelta(
                    serde_json::from_value(raw.clone()).map_err(mismatch)?,
                ),
                StateField::Report => {
                    FieldUpdate::Report(serde_json::from_value(raw.clone()).map_err(mismatch)?)
                }
                StateField::ActiveStage => {
                    FieldUpdate::ActiveStage(serde_json::from_value(raw.clone()).map_err(mismatch)?)
                }
            };
            update = update.push(parsed);
        }

        update.validate()?;
        Ok(update)
    }
}
