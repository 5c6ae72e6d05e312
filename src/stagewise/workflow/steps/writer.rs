// SPDX-License-Identifier: MIT

//! Writing step - synthesizes findings into the final report

use async_trait::async_trait;
use std::collections::HashSet;

use super::{prompts, truncate_chars};
use crate::adk::error::StepFailure;
use crate::adk::model::Content;
use crate::stagewise::config::OutputFormat;
use crate::stagewise::workflow::state::{
    Finding, ResearchPlan, Stage, StateUpdate, Turn, WorkflowState,
};
use crate::stagewise::workflow::step::{Step, StepContext, StepOutcome};

const UNKNOWN_SOURCE: &str = "Unknown source";
const PER_SUBTOPIC: usize = 3;
const ADDITIONAL: usize = 5;

pub struct WriterStep;

#[async_trait]
impl Step for WriterStep {
    fn stage(&self) -> Stage {
        Stage::Writing
    }

    async fn execute(
        &self,
        state: &WorkflowState,
        ctx: &StepContext,
    ) -> Result<StepOutcome, StepFailure> {
        let plan = state.plan().ok_or_else(|| {
            StepFailure::new(self.name(), "no research plan available for report writing")
        })?;
        if state.iteration_count() == 0 {
            return Err(StepFailure::new(
                self.name(),
                "report requested before any research iteration",
            ));
        }
        let query = state
            .initial_query()
            .ok_or_else(|| StepFailure::new(self.name(), "no user query found for report writing"))?;

        if state.findings().is_empty() {
            log::warn!("No research results available, writing report from the plan alone");
        }
        log::info!(
            "Writing report for query '{}' from {} findings",
            query,
            state.findings().len()
        );

        let format = ctx.config.output_format;
        let summary = research_summary(plan, state.findings());
        let history = vec![
            Content::system(prompts::writer_system(format, ctx.config.include_sources)),
            Content::user(prompts::writer_request(
                query,
                &plan.main_topic,
                &plan.subtopics,
                plan.questions.len(),
                &summary,
            )),
        ];

        let body = match ctx.call_model(Stage::Writing, &history, None).await {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => Err(StepFailure::new(self.name(), "model returned an empty report")),
            Err(failure) => Err(failure),
        };

        let (report, turn) = match body {
            Ok(body) => {
                let report = decorate(&body, state, plan, format, ctx.config.include_sources);
                log::info!("Report generated ({} characters)", report.len());
                let turn = format!("Research report completed for: {}\n\n{}", query, report);
                (report, turn)
            }
            Err(failure) if ctx.config.fallback_report => {
                log::error!("Report generation failed, writing summary report: {}", failure);
                let report = fallback_report(state, plan, query, &failure.cause);
                let turn = format!(
                    "Report generation encountered an error, but a summary report was created:\n\n{}",
                    report
                );
                (report, turn)
            }
            Err(failure) => return Err(failure),
        };

        let update = StateUpdate::empty()
            .report(report)
            .append_history(Turn::assistant(Stage::Writing, turn))
            .stage(Stage::Done);
        Ok(StepOutcome::proceed(update))
    }
}

/// Findings grouped by the first subtopic whose leading words occur in the query
pub fn research_summary(plan: &ResearchPlan, findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "No research results available.".to_string();
    }

    let mut grouped: Vec<(&str, Vec<&Finding>)> = Vec::new();
    let mut other = Vec::new();

    for finding in findings {
        let query = finding.query.to_lowercase();
        let matched = plan.subtopics.iter().find(|subtopic| {
            subtopic
                .split_whitespace()
                .take(3)
                .any(|word| query.contains(&word.to_lowercase()))
        });
        match matched {
            Some(subtopic) => match grouped.iter().position(|(s, _)| *s == subtopic.as_str()) {
                Some(idx) => grouped[idx].1.push(finding),
                None => grouped.push((subtopic.as_str(), vec![finding])),
            },
            None => other.push(finding),
        }
    }

    let mut parts = Vec::new();
    for (subtopic, group) in &grouped {
        parts.push(format!("\n--- {} ---", subtopic));
        for (i, finding) in group.iter().take(PER_SUBTOPIC).enumerate() {
            push_excerpt(&mut parts, i + 1, finding, 500);
        }
    }
    if !other.is_empty() {
        parts.push("\n--- Additional Research ---".to_string());
        for (i, finding) in other.iter().take(ADDITIONAL).enumerate() {
            push_excerpt(&mut parts, i + 1, finding, 300);
        }
    }
    parts.join("\n")
}

fn push_excerpt(parts: &mut Vec<String>, n: usize, finding: &Finding, max_chars: usize) {
    parts.push(format!("{}. Query: {}", n, finding.query));
    parts.push(format!(
        "   Content: {}...",
        truncate_chars(&finding.content, max_chars)
    ));
    parts.push(format!("   Source: {}", finding.source));
    parts.push(String::new());
}

fn unique_sources(findings: &[Finding]) -> Vec<&str> {
    let mut seen = HashSet::new();
    findings
        .iter()
        .map(|f| f.source.as_str())
        .filter(|s| *s != UNKNOWN_SOURCE && seen.insert(*s))
        .collect()
}

fn report_date() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// Prefix the metadata header and append a sources list when missing
fn decorate(
    body: &str,
    state: &WorkflowState,
    plan: &ResearchPlan,
    format: OutputFormat,
    include_sources: bool,
) -> String {
    let findings = state.findings();
    let fields = [
        ("Topic", plan.main_topic.clone()),
        ("Research Date", report_date()),
        (
            "Sources Consulted",
            format!("{} research sources", findings.len()),
        ),
        ("Research Iterations", state.iteration_count().to_string()),
    ];

    let mut report = match format {
        OutputFormat::Markdown => {
            let mut header = String::from("# Research Report\n\n");
            for (label, value) in &fields {
                header.push_str(&format!("**{}:** {}\n", label, value));
            }
            header.push_str("\n---\n\n");
            header
        }
        OutputFormat::Plain => {
            let mut header = String::from("RESEARCH REPORT\n\n");
            for (label, value) in &fields {
                header.push_str(&format!("{}: {}\n", label, value));
            }
            header.push('\n');
            header
        }
    };
    report.push_str(body.trim_end());

    let lower = body.to_lowercase();
    let has_sources = lower.contains("sources:") || lower.contains("## sources");
    let sources = unique_sources(findings);
    if include_sources && !has_sources && !sources.is_empty() {
        report.push_str(match format {
            OutputFormat::Markdown => "\n\n## Sources\n\n",
            OutputFormat::Plain => "\n\nSOURCES\n\n",
        });
        for (i, source) in sources.iter().enumerate() {
            report.push_str(&format!("{}. {}\n", i + 1, source));
        }
    }
    report
}

/// Summary-mode report written when the model cannot produce one
fn fallback_report(state: &WorkflowState, plan: &ResearchPlan, query: &str, error: &str) -> String {
    let mut report = format!(
        "# Research Report - Summary\n\n\
         **Topic:** {}\n\
         **Status:** Partial report due to processing error\n\n\
         ## Summary\n\n\
         This is a summary report generated after an error during full report generation.\n\n\
         **Original Query:** {}\n\n",
        plan.main_topic, query
    );

    report.push_str(&format!(
        "## Research Plan\n\n**Main Topic:** {}\n\n**Subtopics Investigated:**\n",
        plan.main_topic
    ));
    for subtopic in &plan.subtopics {
        report.push_str(&format!("- {}\n", subtopic));
    }
    report.push_str("\n**Key Research Questions:**\n");
    for question in plan.questions.iter().take(5) {
        report.push_str(&format!("- {}\n", question));
    }
    report.push('\n');

    let findings = state.findings();
    if !findings.is_empty() {
        report.push_str(&format!(
            "## Research Findings Summary\n\n\
             **Total Sources Consulted:** {}\n\
             **Research Iterations Completed:** {}\n\n\
             **Key Findings:**\n",
            findings.len(),
            state.iteration_count()
        ));
        for (i, finding) in findings.iter().take(3).enumerate() {
            report.push_str(&format!(
                "\n{}. **{}**\n   - {}...\n   - Source: {}\n",
                i + 1,
                finding.query,
                truncate_chars(&finding.content, 200),
                finding.source
            ));
        }
    }

    report.push_str(&format!(
        "\n## Note\n\n\
         This report was generated in summary mode due to a processing error: {}\n\n\
         For a complete analysis, please retry the research request.\n",
        error
    ));
    report
}
