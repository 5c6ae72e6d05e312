// SPDX-License-Identifier: MIT

//! Explicit initialization of the run service
//!
//! Builds every collaborator from [`Settings`] and reports what it got as
//! [`ComponentStatus`] values instead of printing diagnostics.

use serde::Serialize;
use std::sync::Arc;

use crate::adk::error::StagewiseError;
use crate::adk::model::openai::OpenAIModel;
use crate::adk::model::Model;
use crate::stagewise::config::{RunConfig, Settings};
use crate::stagewise::tools::scoring::{self, ProviderScore, RelevanceScorer};
use crate::stagewise::tools::search;
use crate::stagewise::workflow::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::stagewise::workflow::service::WorkflowService;
use crate::stagewise::workflow::step::Collaborators;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComponentState {
    Ready,
    /// Usable, with reduced behavior
    Degraded { reason: String },
    /// Requested but unavailable; a default stands in
    Missing { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentStatus {
    pub component: String,
    pub provider: String,
    #[serde(flatten)]
    pub state: ComponentState,
}

impl ComponentStatus {
    fn ready(component: &str, provider: &str) -> Self {
        Self {
            component: component.to_string(),
            provider: provider.to_string(),
            state: ComponentState::Ready,
        }
    }
}

pub struct Bootstrap {
    pub service: Arc<WorkflowService>,
    pub components: Vec<ComponentStatus>,
}

impl Bootstrap {
    pub fn is_degraded(&self) -> bool {
        self.components
            .iter()
            .any(|c| c.state != ComponentState::Ready)
    }
}

/// File checkpoint store under `settings.checkpoint_dir`; needs no credentials
pub fn checkpoint_store(settings: &Settings) -> Arc<dyn CheckpointStore> {
    Arc::new(FileCheckpointStore::new(settings.checkpoint_dir.clone()))
}

/// Build the service on top of [`checkpoint_store`]
pub fn bootstrap(settings: &Settings, config: RunConfig) -> Result<Bootstrap, StagewiseError> {
    bootstrap_with_store(settings, config, checkpoint_store(settings))
}

pub fn bootstrap_with_store(
    settings: &Settings,
    config: RunConfig,
    store: Arc<dyn CheckpointStore>,
) -> Result<Bootstrap, StagewiseError> {
    config.validate()?;
    let mut components = Vec::new();

    let api_key = settings
        .openai_api_key
        .as_deref()
        .ok_or_else(|| StagewiseError::config("OPENAI_API_KEY must be set"))?;
    let model: Arc<dyn Model> = Arc::new(OpenAIModel::new(
        api_key,
        settings.openai_model.clone(),
        settings.openai_base_url.clone(),
    )?);
    components.push(ComponentStatus::ready("model", model.name()));

    let (search, note) = search::from_api_key(settings.tavily_api_key.as_deref());
    components.push(ComponentStatus {
        component: "search".to_string(),
        provider: search.name().to_string(),
        state: match note {
            Some(reason) => ComponentState::Degraded { reason },
            None => ComponentState::Ready,
        },
    });

    let (scorer, state) = match settings.scorer.as_deref() {
        None => (
            Arc::new(ProviderScore) as Arc<dyn RelevanceScorer>,
            ComponentState::Ready,
        ),
        Some(name) => match scoring::from_name(name) {
            Some(scorer) => (scorer, ComponentState::Ready),
            None => (
                Arc::new(ProviderScore) as Arc<dyn RelevanceScorer>,
                ComponentState::Missing {
                    reason: format!("no scorer named '{}', using provider scores", name),
                },
            ),
        },
    };
    components.push(ComponentStatus {
        component: "scorer".to_string(),
        provider: scorer.name().to_string(),
        state,
    });
    components.push(ComponentStatus::ready("checkpoints", store.name()));

    for status in &components {
        match &status.state {
            ComponentState::Ready => {
                log::info!("{} ready ({})", status.component, status.provider)
            }
            ComponentState::Degraded { reason } => {
                log::warn!(
                    "{} degraded ({}): {}",
                    status.component,
                    status.provider,
                    reason
                )
            }
            ComponentState::Missing { reason } => {
                log::warn!("{} missing: {}", status.component, reason)
            }
        }
    }

    let collaborators = Collaborators {
        model,
        search,
        scorer,
    };
    let service = Arc::new(WorkflowService::new(collaborators, store, config));
    Ok(Bootstrap {
        service,
        components,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stagewise::workflow::checkpoint::MemoryCheckpointStore;

    fn memory() -> Arc<dyn CheckpointStore> {
        Arc::new(MemoryCheckpointStore::new())
    }

    #[test]
    fn test_missing_model_key_is_config_error() {
        let settings = Settings::default();
        let result = bootstrap_with_store(&settings, RunConfig::default(), memory());
        assert!(matches!(result, Err(StagewiseError::Config(_))));
    }

    #[test]
    fn test_missing_search_key_degrades() {
        let settings = Settings {
            openai_api_key: Some("sk-test".into()),
            ..Settings::default()
        };
        let boot = bootstrap_with_store(&settings, RunConfig::default(), memory()).unwrap();

        assert!(boot.is_degraded());
        let search = boot
            .components
            .iter()
            .find(|c| c.component == "search")
            .unwrap();
        assert_eq!(search.provider, "stub_search");
        assert!(matches!(search.state, ComponentState::Degraded { .. }));
    }

    #[test]
    fn test_fully_configured_is_ready() {
        let settings = Settings {
            openai_api_key: Some("sk-test".into()),
            tavily_api_key: Some("tvly-test".into()),
            ..Settings::default()
        };
        let boot = bootstrap_with_store(&settings, RunConfig::default(), memory()).unwrap();
        assert!(!boot.is_degraded());
        assert_eq!(boot.components.len(), 4);
    }

    #[test]
    fn test_scorer_selection() {
        let settings = Settings {
            openai_api_key: Some("sk-test".into()),
            tavily_api_key: Some("tvly-test".into()),
            scorer: Some("term_overlap".into()),
            ..Settings::default()
        };
        let boot = bootstrap_with_store(&settings, RunConfig::default(), memory()).unwrap();
        let scorer = boot
            .components
            .iter()
            .find(|c| c.component == "scorer")
            .unwrap();
        assert_eq!(scorer.provider, "term_overlap");
        assert_eq!(scorer.state, ComponentState::Ready);

        let settings = Settings {
            scorer: Some("bm25".into()),
            ..settings
        };
        let boot = bootstrap_with_store(&settings, RunConfig::default(), memory()).unwrap();
        assert!(boot.is_degraded());
        let scorer = boot
            .components
            .iter()
            .find(|c| c.component == "scorer")
            .unwrap();
        assert_eq!(scorer.provider, "provider");
        assert!(matches!(scorer.state, ComponentState::Missing { .. }));
    }

    #[test]
    fn test_status_serializes_flat() {
        let status = ComponentStatus {
            component: "search".into(),
            provider: "stub_search".into(),
            state: ComponentState::Degraded {
                reason: "no key".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({
                "component": "search",
                "provider": "stub_search",
                "status": "degraded",
                "reason": "no key"
            })
        );
    }
}
