// SPDX-License-Identifier: MIT

//! System prompts for the model-backed steps

use crate::stagewise::config::{OutputFormat, ResearchDepth};

const PLANNER_BASE: &str = "You are a research planning specialist. Analyze the user's query \
and produce a research plan. Respond using exactly these sections:

Main Topic: <one line>

Subtopics:
- <subtopic>

Research Questions:
- <question>";

const WRITER_BASE: &str = "You are a research report writer. Synthesize the findings you are \
given into a clear, well-structured report that answers the user's original query. Stay \
faithful to the findings and call out conflicting viewpoints.";

pub fn planner_system(depth: ResearchDepth) -> String {
    let scope = match depth {
        ResearchDepth::Quick => "Keep the plan tight: 2-3 subtopics and 3 questions.",
        ResearchDepth::Standard => "Aim for 3-5 subtopics and 5 questions.",
        ResearchDepth::Comprehensive => {
            "Be thorough: up to 7 subtopics and up to 10 specific questions."
        }
    };
    format!("{}\n\n{}", PLANNER_BASE, scope)
}

pub fn planner_request(query: &str) -> String {
    format!(
        "User Query: {}\n\nPlease create a comprehensive research plan for this query.",
        query
    )
}

pub fn writer_system(format: OutputFormat, include_sources: bool) -> String {
    let style = match format {
        OutputFormat::Markdown => "Format the report in Markdown with headed sections.",
        OutputFormat::Plain => "Write plain text only. Do not use Markdown markup.",
    };
    let citations = if include_sources {
        "Cite the source of each claim."
    } else {
        "Do not include a list of sources."
    };
    format!("{}\n\n{} {}", WRITER_BASE, style, citations)
}

pub fn writer_request(
    query: &str,
    main_topic: &str,
    subtopics: &[String],
    question_count: usize,
    summary: &str,
) -> String {
    format!(
        "Original User Query: {}\n\n\
         Research Plan Summary:\n\
         - Main Topic: {}\n\
         - Subtopics: {}\n\
         - Research Questions: {} questions investigated\n\n\
         Research Findings:\n{}\n\n\
         Please create a comprehensive report that addresses the user's original query.",
        query,
        main_topic,
        subtopics.join(", "),
        question_count,
        summary
    )
}
