// SPDX-License-Identifier: MIT

//! State management for research runs
//!
//! This module provides:
//! - `WorkflowState` - the record threaded through every step
//! - `StateUpdate` - closed set of partial updates a step may return
//! - `ReducerType` - how each field folds an update into the state

mod schema;
mod store;
mod update;

pub use schema::{Finding, ReducerType, ResearchPlan, Role, Stage, StateField, Turn};
pub use store::WorkflowState;
pub use update::{FieldUpdate, StateUpdate};
