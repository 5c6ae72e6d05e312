// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Checkpoint, CheckpointStore};
use crate::adk::error::WorkflowError;

/// Process-local store, lost on exit
#[derive(Clone)]
pub struct MemoryCheckpointStore {
    runs: Arc<RwLock<HashMap<String, Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), WorkflowError> {
        let mut runs = self.runs.write().await;
        runs.insert(checkpoint.run_id.clone(), checkpoint.clone());
        log::debug!(
            "Checkpoint saved in memory for run '{}' at cursor {}",
            checkpoint.run_id,
            checkpoint.cursor
        );
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>, WorkflowError> {
        let runs = self.runs.read().await;
        Ok(runs.get(run_id).cloned())
    }

    async fn list(&self) -> Result<Vec<String>, WorkflowError> {
        let runs = self.runs.read().await;
        let mut ids: Vec<String> = runs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
