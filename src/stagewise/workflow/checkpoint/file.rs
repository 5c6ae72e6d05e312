// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{validate_run_id, Checkpoint, CheckpointStore};
use crate::adk::error::WorkflowError;

/// One JSON file per run under a directory.
///
/// Writes go to a temporary file that is synced and then renamed over the
/// previous checkpoint, and the directory is synced after the rename. A crash
/// leaves either the old or the new snapshot.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }
}

async fn write_synced(tmp: &Path, body: &[u8], path: &Path) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(body).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp, path).await
}

/// Persist the rename itself
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), WorkflowError> {
        let run_id = checkpoint.run_id.as_str();
        validate_run_id(run_id)?;
        let io_err = |e: std::io::Error| WorkflowError::persistence(run_id, e);

        fs::create_dir_all(&self.dir).await.map_err(io_err)?;

        let body = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| WorkflowError::persistence(run_id, e))?;
        let path = self.path_for(run_id);
        let tmp = self.dir.join(format!("{}.json.tmp", run_id));

        if let Err(e) = write_synced(&tmp, &body, &path).await {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    log::warn!("Could not remove {}: {}", tmp.display(), cleanup);
                }
            }
            return Err(io_err(e));
        }
        sync_dir(&self.dir).await.map_err(io_err)?;

        log::debug!(
            "Checkpoint written to {} at cursor {}",
            path.display(),
            checkpoint.cursor
        );
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>, WorkflowError> {
        validate_run_id(run_id)?;
        let content = match fs::read_to_string(self.path_for(run_id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(WorkflowError::persistence(run_id, e)),
        };
        let checkpoint = serde_json::from_str(&content)
            .map_err(|e| WorkflowError::persistence(run_id, format!("corrupt checkpoint: {}", e)))?;
        Ok(Some(checkpoint))
    }

    async fn list(&self) -> Result<Vec<String>, WorkflowError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WorkflowError::persistence("*", e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WorkflowError::persistence("*", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
