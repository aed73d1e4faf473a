//! File-backed artifact persistence.
//!
//! Artifacts are stored one JSON file per (workflow, stage, step) key.
//! A key is write-once: a second write for the same key is rejected so
//! a settled step output can never be mutated. Attempt resumes read the
//! existing artifact back instead of re-dispatching the step.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::fs;

use crate::domain::{Artifact, ArtifactKey};

/// Artifact persistence failures
#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    #[error("artifact already exists for key {0}")]
    AlreadyExists(ArtifactKey),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Filesystem artifact store rooted at a base directory
pub struct FsArtifactStore {
    base_dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.base_dir
            .join(&key.workflow_id)
            .join(format!("stage-{}", key.stage))
            .join(format!("{}.json", key.step_name))
    }

    /// Persist an artifact. Fails if the key was already written.
    pub async fn put(&self, artifact: &Artifact) -> Result<(), ArtifactStoreError> {
        let path = self.path_for(&artifact.key);

        if fs::try_exists(&path).await? {
            return Err(ArtifactStoreError::AlreadyExists(artifact.key.clone()));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(artifact)?;
        fs::write(&path, json).await?;

        Ok(())
    }

    /// Load the artifact for a key, if one was written
    pub async fn load(&self, key: &ArtifactKey) -> Result<Option<Artifact>> {
        let path = self.path_for(key);

        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("Failed to read artifact: {}", path.display()))?;
        let artifact = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse artifact: {}", path.display()))?;

        Ok(Some(artifact))
    }

    /// List step names with artifacts for a (workflow, stage) pair
    pub async fn list_steps(&self, workflow_id: &str, stage: u32) -> Result<Vec<String>> {
        let dir = self
            .base_dir
            .join(workflow_id)
            .join(format!("stage-{}", stage));

        let mut steps = Vec::new();
        if !fs::try_exists(&dir).await? {
            return Ok(steps);
        }

        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(step) = name.strip_suffix(".json") {
                    steps.push(step.to_string());
                }
            }
        }

        steps.sort_unstable();
        Ok(steps)
    }
}
