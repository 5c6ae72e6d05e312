// SPDX-License-Identifier: MIT

//! Research step - runs web searches for a window of the plan

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;

use super::truncate_chars;
use crate::adk::error::StepFailure;
use crate::stagewise::workflow::state::{
    Finding, ResearchPlan, Stage, StateUpdate, Turn, WorkflowState,
};
use crate::stagewise::workflow::runner::RunEvent;
use crate::stagewise::workflow::step::{Step, StepContext, StepOutcome};

const MAX_FINDING_CHARS: usize = 2000;

pub struct ResearcherStep;

#[async_trait]
impl Step for ResearcherStep {
    fn stage(&self) -> Stage {
        Stage::Researching
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        ctx: &StepContext,
    ) -> Result<StepOutcome, StepFailure> {
        if state.iterations_exhausted() {
            log::info!(
                "Research cap reached ({}/{}), skipping",
                state.iteration_count(),
                state.iteration_limit()
            );
            return Ok(StepOutcome::proceed(StateUpdate::empty()));
        }

        let plan = state
            .plan()
            .ok_or_else(|| StepFailure::new(self.name(), "no research plan available"))?;

        let iteration = state.iteration_count() + 1;
        let queries = build_queries(plan, iteration, state.iteration_limit());
        log::info!(
            "Research iteration {}/{}: {} queries",
            iteration,
            state.iteration_limit(),
            queries.len()
        );

        let searches = queries
            .iter()
            .map(|q| ctx.search(Stage::Researching, q));
        let results = join_all(searches).await;

        let scorer = ctx.scorer();
        let mut findings = Vec::new();
        for (query, result) in queries.iter().zip(results) {
            for hit in result? {
                findings.push(Finding {
                    query: query.clone(),
                    relevance: scorer.score(query, &hit),
                    content: truncate_chars(&hit.content, MAX_FINDING_CHARS),
                    source: hit.source,
                });
            }
        }
        log::info!(
            "Research iteration {} collected {} findings",
            iteration,
            findings.len()
        );
        ctx.emit(RunEvent::StepProgress {
            run_id: ctx.run_id.clone(),
            stage: Stage::Researching,
            message: format!(
                "iteration {}: {} findings from {} queries",
                iteration,
                findings.len(),
                queries.len()
            ),
        })
        .await;

        let summary = format!(
            "Research iteration {} completed. Searched {} queries and found {} relevant results.",
            iteration,
            queries.len(),
            findings.len()
        );
        let update = StateUpdate::empty()
            .append_findings(findings)
            .count_iteration()
            .append_history(Turn::assistant(Stage::Researching, summary))
            .stage(Stage::Researching);
        Ok(StepOutcome::proceed(update))
    }
}

/// Subtopics and questions to cover in iteration `iteration` (1-based)
pub fn focus(plan: &ResearchPlan, iteration: u32, limit: u32) -> (&[String], &[String]) {
    if iteration <= 1 {
        return (head(&plan.subtopics, 3), head(&plan.questions, 5));
    }

    let limit = limit.max(1) as usize;
    let offset = (iteration - 1) as usize;
    let sub_window = (plan.subtopics.len() / limit).max(2);
    let q_window = (plan.questions.len() / limit).max(3);
    (
        window(&plan.subtopics, offset * sub_window, sub_window),
        window(&plan.questions, offset * q_window, q_window),
    )
}

/// Search queries for one iteration, deduplicated keeping the first occurrence
pub fn build_queries(plan: &ResearchPlan, iteration: u32, limit: u32) -> Vec<String> {
    let (subtopics, questions) = focus(plan, iteration, limit);
    let candidates = subtopics
        .iter()
        .map(|s| format!("{} {}", plan.main_topic, s))
        .chain(questions.iter().cloned());

    let mut seen = HashSet::new();
    let mut queries = Vec::new();
    for query in candidates {
        let query = query.trim().to_string();
        if query.is_empty() {
            continue;
        }
        if seen.insert(query.to_lowercase()) {
            queries.push(query);
        }
    }
    queries
}

fn head(items: &[String], n: usize) -> &[String] {
    &items[..items.len().min(n)]
}

fn window(items: &[String], start: usize, len: usize) -> &[String] {
    if start >= items.len() {
        return &[];
    }
    &items[start..items.len().min(start + len)]
}
