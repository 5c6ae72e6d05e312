// SPDX-License-Identifier: MIT

//! Typed error handling for stagewise-rs
//!
//! `WorkflowError` is the taxonomy the runner reasons about. Steps only ever
//! surface a `StepFailure`; everything an external collaborator raises is
//! folded into one before it reaches the runner.

use thiserror::Error;

/// Top-level error type for stagewise-rs
#[derive(Debug, Error)]
pub enum StagewiseError {
    /// API errors from external services (OpenAI, Tavily, etc.)
    #[error("API error from {provider}: {message}")]
    Api { provider: String, message: String },

    /// Configuration errors (missing env vars, invalid config)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Orchestration errors
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Model invocation errors
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Generic error wrapper
    #[error("{0}")]
    Other(String),
}

/// Errors produced while driving a run
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A partial update does not fit the state it is merged into
    #[error("Schema violation on '{field}': {reason}")]
    SchemaViolation { field: String, reason: String },

    /// A step reported failure
    #[error(transparent)]
    Step(#[from] StepFailure),

    /// Checkpoint read or write failed
    #[error("Persistence error for run '{run_id}': {message}")]
    Persistence { run_id: String, message: String },

    /// No checkpoint exists for the requested run
    #[error("Run '{0}' not found")]
    NotFound(String),

    /// Run configuration rejected by validation
    #[error("Invalid run configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a single step, carrying the step name and the cause
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Step '{step}' failed: {cause}")]
pub struct StepFailure {
    pub step: String,
    pub cause: String,
}

/// Model/LLM-specific errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// API key not configured
    #[error("API key not configured for provider: {0}")]
    ApiKeyMissing(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Invalid response from model
    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),

    /// Non-success status from the provider
    #[error("Provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl StagewiseError {
    /// Create an API error
    pub fn api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl WorkflowError {
    pub fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence(run_id: impl Into<String>, message: impl ToString) -> Self {
        Self::Persistence {
            run_id: run_id.into(),
            message: message.to_string(),
        }
    }
}

impl StepFailure {
    pub fn new(step: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            step: step.into(),
            cause: cause.to_string(),
        }
    }
}

impl From<&str> for StagewiseError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for StagewiseError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}
