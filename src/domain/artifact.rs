//! Artifacts produced by pipeline steps.
//!
//! An artifact is the immutable output of exactly one step, keyed by
//! (workflow id, stage id, step name). It is written once and never
//! mutated; later steps consume it by reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique key for an artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub workflow_id: String,
    pub stage: u32,
    pub step_name: String,
}

impl ArtifactKey {
    pub fn new(workflow_id: impl Into<String>, stage: u32, step_name: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            stage,
            step_name: step_name.into(),
        }
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/stage-{}/{}", self.workflow_id, self.stage, self.step_name)
    }
}

/// An immutable step output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Key identifying the producing step
    pub key: ArtifactKey,

    /// MIME-ish content type (e.g. "application/json", "text/markdown")
    pub content_type: String,

    /// Step output payload
    pub payload: serde_json::Value,

    /// When the artifact was written
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create an artifact from a step's JSON output
    pub fn from_output(key: ArtifactKey, payload: serde_json::Value) -> Self {
        Self {
            key,
            content_type: "application/json".to_string(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Lightweight reference for result summaries and step records
    pub fn reference(&self) -> ArtifactRef {
        ArtifactRef {
            key: self.key.clone(),
            content_type: self.content_type.clone(),
            created_at: self.created_at,
        }
    }
}

/// Reference to a persisted artifact (no payload)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub key: ArtifactKey,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = ArtifactKey::new("wf-042", 3, "extract");
        assert_eq!(key.to_string(), "wf-042/stage-3/extract");
    }

    #[test]
    fn test_artifact_serialization() {
        let artifact = Artifact::from_output(
            ArtifactKey::new("wf-042", 1, "summarize"),
            serde_json::json!({"summary": "short"}),
        );

        let json = serde_json::to_string(&artifact).unwrap();
        let parsed: Artifact = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.key, artifact.key);
        assert_eq!(parsed.payload["summary"], "short");
    }
}
