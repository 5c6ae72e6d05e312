// SPDX-License-Identifier: MIT

//! Concrete pipeline steps
//!
//! - [planner] - query to research plan
//! - [researcher] - plan to findings, one iteration per invocation
//! - [writer] - findings to report

pub mod planner;
pub mod prompts;
pub mod researcher;
pub mod writer;

pub use planner::PlannerStep;
pub use researcher::ResearcherStep;
pub use writer::WriterStep;

use std::sync::Arc;

use super::step::Step;

/// The fixed research sequence: plan, `rounds` research steps, write
pub fn research_pipeline(rounds: u32) -> Vec<Arc<dyn Step>> {
    let mut steps: Vec<Arc<dyn Step>> = vec![Arc::new(PlannerStep)];
    for _ in 0..rounds.max(1) {
        steps.push(Arc::new(ResearcherStep));
    }
    steps.push(Arc::new(WriterStep));
    steps
}

/// First `max` characters of `text`, on a char boundary
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
