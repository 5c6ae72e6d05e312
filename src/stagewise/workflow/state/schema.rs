// SPDX-License-Identifier: MIT

//! Shape of the workflow state: records, stages and per-field reducers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stage that currently owns the state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Planning,
    Researching,
    Writing,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::Researching => "researching",
            Stage::Writing => "writing",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planning" | "planner" => Ok(Stage::Planning),
            "researching" | "researcher" => Ok(Stage::Researching),
            "writing" | "writer" => Ok(Stage::Writing),
            "done" => Ok(Stage::Done),
            other => Err(format!("unknown stage: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One conversational turn in the run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Stage that produced the turn, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(stage: Stage, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            name: Some(stage.to_string()),
        }
    }
}

/// Structured research plan written by the planning step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub main_topic: String,
    pub subtopics: Vec<String>,
    pub questions: Vec<String>,
}

/// Single research result appended by the research step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub query: String,
    pub content: String,
    pub source: String,
    /// Relevance in [0, 1]
    pub relevance: f64,
}

/// Fields a partial update may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    History,
    Plan,
    Findings,
    IterationCount,
    Report,
    ActiveStage,
}

impl StateField {
    pub const ALL: [StateField; 6] = [
        StateField::History,
        StateField::Plan,
        StateField::Findings,
        StateField::IterationCount,
        StateField::Report,
        StateField::ActiveStage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StateField::History => "history",
            StateField::Plan => "plan",
            StateField::Findings => "findings",
            StateField::IterationCount => "iteration_count",
            StateField::Report => "report",
            StateField::ActiveStage => "active_stage",
        }
    }

    /// How a value for this field is folded into the state
    pub fn reducer(&self) -> ReducerType {
        match self {
            StateField::History | StateField::Findings => ReducerType::Append,
            StateField::IterationCount => ReducerType::Add,
            StateField::Plan | StateField::Report | StateField::ActiveStage => {
                ReducerType::Overwrite
            }
        }
    }
}

impl FromStr for StateField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateField::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| format!("unknown state field: {}", s))
    }
}

/// Reducer types for merging values into state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducerType {
    /// Replace the value
    Overwrite,
    /// Concatenate onto the existing sequence
    Append,
    /// Add a delta to the existing counter
    Add,
}
