// SPDX-License-Identifier: MIT

//! Run configuration and process settings
//!
//! `RunConfig` holds the options recognized per run and can be loaded from
//! YAML. `Settings` carries credentials and paths read from the environment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::adk::error::{StagewiseError, WorkflowError};
use crate::stagewise::workflow::state::Stage;

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    #[serde(alias = "plain_text")]
    Plain,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" => Ok(OutputFormat::Markdown),
            "plain" | "plain_text" => Ok(OutputFormat::Plain),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

/// How broad the planner is asked to go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchDepth {
    Quick,
    Standard,
    #[default]
    Comprehensive,
}

impl FromStr for ResearchDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(ResearchDepth::Quick),
            "standard" => Ok(ResearchDepth::Standard),
            "comprehensive" => Ok(ResearchDepth::Comprehensive),
            other => Err(format!("unknown research depth: {}", other)),
        }
    }
}

/// Options fixed at run start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub iteration_limit: u32,
    pub interrupt_before: BTreeSet<Stage>,
    pub output_format: OutputFormat,
    pub max_search_results: u32,
    pub research_depth: ResearchDepth,
    pub include_sources: bool,
    /// Number of research steps in the fixed sequence
    pub research_rounds: u32,
    /// Upper bound for a single model or search call
    pub call_timeout_secs: u64,
    /// Write a summary-mode report when the model fails in the writing step
    pub fallback_report: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            iteration_limit: 5,
            interrupt_before: BTreeSet::new(),
            output_format: OutputFormat::Markdown,
            max_search_results: 5,
            research_depth: ResearchDepth::Comprehensive,
            include_sources: true,
            research_rounds: 1,
            call_timeout_secs: 60,
            fallback_report: false,
        }
    }
}

impl RunConfig {
    /// Parse a config from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self, StagewiseError> {
        let config: RunConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StagewiseError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.iteration_limit == 0 {
            return Err(WorkflowError::InvalidConfig(
                "iteration_limit must be at least 1".into(),
            ));
        }
        if !(1..=20).contains(&self.max_search_results) {
            return Err(WorkflowError::InvalidConfig(format!(
                "max_search_results must be between 1 and 20, got {}",
                self.max_search_results
            )));
        }
        if self.research_rounds == 0 {
            return Err(WorkflowError::InvalidConfig(
                "research_rounds must be at least 1".into(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(WorkflowError::InvalidConfig(
                "call_timeout_secs must be at least 1".into(),
            ));
        }
        if self.interrupt_before.contains(&Stage::Done) {
            return Err(WorkflowError::InvalidConfig(
                "cannot interrupt before 'done'; it is not a step".into(),
            ));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self, WorkflowError> {
        self.with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides read through `lookup`
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, WorkflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let invalid = |key: &str, value: &str| {
            WorkflowError::InvalidConfig(format!("{} has invalid value '{}'", key, value))
        };

        if let Some(v) = lookup("MAX_RESEARCH_ITERATIONS") {
            self.iteration_limit = v
                .trim()
                .parse()
                .map_err(|_| invalid("MAX_RESEARCH_ITERATIONS", &v))?;
        }
        if let Some(v) = lookup("MAX_SEARCH_RESULTS") {
            self.max_search_results = v
                .trim()
                .parse()
                .map_err(|_| invalid("MAX_SEARCH_RESULTS", &v))?;
        }
        if let Some(v) = lookup("RESEARCH_DEPTH") {
            self.research_depth = v.parse().map_err(|_| invalid("RESEARCH_DEPTH", &v))?;
        }
        if let Some(v) = lookup("OUTPUT_FORMAT") {
            self.output_format = v.parse().map_err(|_| invalid("OUTPUT_FORMAT", &v))?;
        }
        if let Some(v) = lookup("INCLUDE_SOURCES") {
            self.include_sources = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => return Err(invalid("INCLUDE_SOURCES", &v)),
            };
        }

        self.validate()?;
        Ok(self)
    }
}

/// Credentials and paths for the process
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub tavily_api_key: Option<String>,
    pub checkpoint_dir: PathBuf,
    /// Relevance scorer name, `provider` when unset
    pub scorer: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: None,
            tavily_api_key: None,
            checkpoint_dir: PathBuf::from(".stagewise/runs"),
            scorer: None,
        }
    }
}

impl Settings {
    /// Read settings from the environment (call `dotenv().ok()` first)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Settings::default();

        Self {
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_model: non_empty("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_base_url: non_empty("OPENAI_BASE_URL"),
            tavily_api_key: non_empty("TAVILY_API_KEY"),
            checkpoint_dir: non_empty("STAGEWISE_CHECKPOINT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.checkpoint_dir),
            scorer: non_empty("STAGEWISE_SCORER"),
        }
    }
}
