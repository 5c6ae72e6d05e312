// SPDX-License-Identifier: MIT

//! Planning step - turns the user query into a structured research plan

use async_trait::async_trait;

use super::prompts;
use crate::adk::error::StepFailure;
use crate::adk::model::{Content, GenerationConfig};
use crate::stagewise::workflow::state::{ResearchPlan, Stage, StateUpdate, Turn, WorkflowState};
use crate::stagewise::workflow::step::{Step, StepContext, StepOutcome};

const MAX_SUBTOPICS: usize = 7;
const MAX_QUESTIONS: usize = 10;
const BULLET_CHARS: &[char] = &['-', '•', '*', '.', ' ', '1', '2', '3', '4', '5', '6', '7', '8', '9'];

pub struct PlannerStep;

#[async_trait]
impl Step for PlannerStep {
    fn stage(&self) -> Stage {
        Stage::Planning
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        ctx: &StepContext,
    ) -> Result<StepOutcome, StepFailure> {
        let query = state
            .latest_query()
            .ok_or_else(|| StepFailure::new(self.name(), "no user message found for planning"))?;
        log::info!("Planning research for query: {}", query);

        let history = vec![
            Content::system(prompts::planner_system(ctx.config.research_depth)),
            Content::user(prompts::planner_request(query)),
        ];
        // Zero temperature keeps re-plans after a crash structurally stable.
        let generation = GenerationConfig {
            temperature: Some(0.0),
            ..GenerationConfig::default()
        };

        let text = ctx
            .call_model(Stage::Planning, &history, Some(&generation))
            .await?;
        if text.trim().is_empty() {
            return Err(StepFailure::new(self.name(), "model returned an empty plan"));
        }

        let plan = parse_plan(&text, query);
        log::info!(
            "Research plan created with {} subtopics and {} questions",
            plan.subtopics.len(),
            plan.questions.len()
        );

        let update = StateUpdate::empty()
            .plan(plan)
            .append_history(Turn::assistant(
                Stage::Planning,
                format!("Research plan created:\n\n{}", text.trim()),
            ))
            .stage(Stage::Planning);
        Ok(StepOutcome::proceed(update))
    }
}

/// Parse free-text model output into a plan, falling back per section
pub fn parse_plan(content: &str, query: &str) -> ResearchPlan {
    ResearchPlan {
        main_topic: extract_main_topic(content, query),
        subtopics: extract_subtopics(content),
        questions: extract_questions(content),
    }
}

fn strip_markup(line: &str) -> &str {
    line.trim().trim_matches(|c| c == '*' || c == '#').trim()
}

fn is_header(line: &str) -> bool {
    strip_markup(line).ends_with(':')
}

fn clean_item(line: &str) -> String {
    line.trim_start_matches(BULLET_CHARS)
        .trim()
        .trim_matches('*')
        .trim()
        .to_string()
}

fn extract_main_topic(content: &str, fallback: &str) -> String {
    for line in content.lines() {
        let lower = line.to_lowercase();
        if lower.contains("main topic") || lower.contains("topic:") {
            if let Some((_, topic)) = line.split_once(':') {
                let topic = topic.trim().trim_matches('*').trim();
                if !topic.is_empty() {
                    return topic.to_string();
                }
            }
        }
    }
    fallback.trim().to_string()
}

fn extract_subtopics(content: &str) -> Vec<String> {
    let mut subtopics = Vec::new();
    let mut in_section = false;

    for line in content.lines().map(str::trim) {
        let lower = line.to_lowercase();
        if lower.contains("subtopic") && line.contains(':') {
            in_section = true;
            continue;
        }
        if in_section && !line.is_empty() && is_header(line) && lower.contains("question") {
            break;
        }
        if in_section && !line.is_empty() {
            let cleaned = clean_item(line);
            if cleaned.chars().count() > 3 {
                subtopics.push(cleaned);
            }
        }
    }

    if subtopics.is_empty() {
        subtopics.push("General research topic".to_string());
    }
    subtopics.truncate(MAX_SUBTOPICS);
    subtopics
}

fn extract_questions(content: &str) -> Vec<String> {
    let mut questions = Vec::new();
    let mut in_section = false;

    for line in content.lines().map(str::trim) {
        let lower = line.to_lowercase();
        if lower.contains("question") && line.contains(':') {
            in_section = true;
            continue;
        }
        if in_section && !line.is_empty() && is_header(line) && !lower.contains("question") {
            break;
        }
        if in_section && !line.is_empty() {
            let mut cleaned = clean_item(line);
            if cleaned.chars().count() > 10 {
                if !cleaned.ends_with('?') {
                    cleaned.push('?');
                }
                questions.push(cleaned);
            }
        }
    }

    if questions.is_empty() {
        questions.push("What are the key aspects of this topic?".to_string());
    }
    questions.truncate(MAX_QUESTIONS);
    questions
}
