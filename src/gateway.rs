//! Job submission gateway and status API.
//!
//! Submission validates the workflow id and the stage's declared input
//! fields before any job row exists; a validation failure creates
//! nothing. Duplicate submissions are deduplicated strictly: the same
//! (workflow, stage, payload) maps to one idempotency key and returns
//! the existing job id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::core::stage::{InputField, Mode, StageRegistry};
use crate::core::{ProgressBroadcaster, Subscription};
use crate::domain::{Job, JobError, JobResult, JobStatus, StepStatus};
use crate::error::ErrorCode;
use crate::queue::{JobQueue, JobStore};

const MAX_WORKFLOW_ID_LEN: usize = 64;

/// A stage execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub workflow_id: String,

    #[serde(default)]
    pub mode: Mode,

    /// Stage-specific payload fields
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Accepted submission (HTTP 202 analog)
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,

    /// True when an identical earlier submission was returned instead
    /// of creating a new job
    pub deduplicated: bool,
}

/// Rejected submission (HTTP 400 analog); no job is created
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    #[error("invalid workflow id: {reason}")]
    WorkflowId { reason: String },

    #[error("unknown stage {stage}")]
    UnknownStage { stage: u32 },

    #[error("invalid field '{field}': {reason}")]
    Field { field: String, reason: String },
}

impl SubmitError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::ValidationError
    }
}

/// Status lookup failure (HTTP 404 analog)
#[derive(Debug, Clone, Copy, Error)]
#[error("unknown job id: {0}")]
pub struct UnknownJob(pub Uuid);

/// Point-in-time job snapshot
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub job_id: Uuid,
    pub status: JobStatus,

    /// Completed-steps / total-steps as a percentage
    pub progress: u8,

    pub step_statuses: Vec<StepStatusView>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

/// One step's status within a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct StepStatusView {
    pub step: String,
    pub status: StepStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

/// Validates submissions, creates jobs, serves status snapshots
pub struct Gateway {
    stages: Arc<StageRegistry>,
    store: Arc<JobStore>,
    queue: Arc<JobQueue>,
    broadcaster: Arc<ProgressBroadcaster>,

    /// Idempotency key -> existing job id
    dedup: Mutex<HashMap<String, Uuid>>,
}

impl Gateway {
    pub fn new(
        stages: Arc<StageRegistry>,
        store: Arc<JobStore>,
        queue: Arc<JobQueue>,
        broadcaster: Arc<ProgressBroadcaster>,
    ) -> Self {
        Self {
            stages,
            store,
            queue,
            broadcaster,
            dedup: Mutex::new(HashMap::new()),
        }
    }

    /// Validate and enqueue a stage execution.
    ///
    /// One persistence write plus one queue publish on success;
    /// no side effects on a validation failure.
    #[instrument(skip(self, request), fields(stage, workflow = %request.workflow_id))]
    pub fn submit(&self, stage: u32, request: SubmitRequest) -> Result<SubmitResponse, SubmitError> {
        validate_workflow_id(&request.workflow_id)?;

        let definition = self
            .stages
            .get(stage)
            .ok_or(SubmitError::UnknownStage { stage })?;

        for field in &definition.inputs {
            validate_field(field, &request.fields)?;
        }

        let key = idempotency_key(&request.workflow_id, stage, &request.fields);

        // Lookup and insert stay under one lock so two identical
        // concurrent submissions cannot both create a job.
        let mut dedup = self.dedup.lock().expect("dedup lock poisoned");
        if let Some(existing) = dedup.get(&key) {
            if let Some(job) = self.store.get(*existing) {
                info!(job_id = %job.id, "Duplicate submission, returning existing job");
                return Ok(SubmitResponse {
                    job_id: job.id,
                    status: job.status,
                    deduplicated: true,
                });
            }
        }

        let job = Job::new(
            request.workflow_id,
            stage,
            request.mode,
            request.fields,
            &definition.step_names(),
        );
        let job_id = job.id;

        self.store.insert(job);
        self.broadcaster.register(job_id);
        self.queue.push(job_id);
        dedup.insert(key, job_id);

        info!(%job_id, "Job queued");
        Ok(SubmitResponse {
            job_id,
            status: JobStatus::Queued,
            deduplicated: false,
        })
    }

    /// Read-only snapshot by job id
    pub fn status(&self, job_id: Uuid) -> Result<StatusView, UnknownJob> {
        let job = self.store.get(job_id).ok_or(UnknownJob(job_id))?;

        Ok(StatusView {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            step_statuses: job
                .steps
                .iter()
                .map(|s| StepStatusView {
                    step: s.name.clone(),
                    status: s.status,
                    error_code: s.error_code,
                })
                .collect(),
            result: job.result,
            error: job.error,
        })
    }

    /// Subscribe to a job's progress stream (replay then tail)
    pub fn subscribe(&self, job_id: Uuid) -> Result<Subscription, UnknownJob> {
        self.broadcaster.subscribe(job_id).ok_or(UnknownJob(job_id))
    }

    /// Reclaim expired event channels along with the dedup entries
    /// that pointed at the reaped jobs. Returns how many channels were
    /// reclaimed.
    pub fn reap_expired(&self) -> usize {
        let reaped = self.broadcaster.reap_expired();
        if reaped > 0 {
            let mut dedup = self.dedup.lock().expect("dedup lock poisoned");
            dedup.retain(|_, job_id| self.broadcaster.contains(*job_id));
        }
        reaped
    }
}

fn validate_workflow_id(id: &str) -> Result<(), SubmitError> {
    if id.is_empty() {
        return Err(SubmitError::WorkflowId {
            reason: "must not be empty".to_string(),
        });
    }
    if id.len() > MAX_WORKFLOW_ID_LEN {
        return Err(SubmitError::WorkflowId {
            reason: format!("longer than {} characters", MAX_WORKFLOW_ID_LEN),
        });
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SubmitError::WorkflowId {
            reason: "only alphanumerics, '-' and '_' allowed".to_string(),
        });
    }
    Ok(())
}

fn validate_field(
    field: &InputField,
    payload: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), SubmitError> {
    let value = match payload.get(&field.name) {
        Some(value) => value,
        None => {
            if field.required {
                return Err(SubmitError::Field {
                    field: field.name.clone(),
                    reason: "missing required field".to_string(),
                });
            }
            return Ok(());
        }
    };

    if let Some(min) = field.min_length {
        match value.as_str() {
            Some(text) if text.trim().len() >= min => {}
            Some(_) => {
                return Err(SubmitError::Field {
                    field: field.name.clone(),
                    reason: format!("shorter than {} characters", min),
                });
            }
            None => {
                return Err(SubmitError::Field {
                    field: field.name.clone(),
                    reason: "expected a text value".to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Stable key for duplicate detection: first 16 hex chars of
/// sha256(workflow_id:stage:payload)
fn idempotency_key(
    workflow_id: &str,
    stage: u32,
    fields: &serde_json::Map<String, serde_json::Value>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workflow_id.as_bytes());
    hasher.update(b":");
    hasher.update(stage.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(serde_json::to_string(fields).unwrap_or_default().as_bytes());
    let digest = hasher.finalize();

    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_id_rules() {
        assert!(validate_workflow_id("wf-2024_001").is_ok());
        assert!(validate_workflow_id("").is_err());
        assert!(validate_workflow_id("has space").is_err());
        assert!(validate_workflow_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_field_min_length() {
        let field = InputField {
            name: "research_question".to_string(),
            required: true,
            min_length: Some(10),
        };

        let mut payload = serde_json::Map::new();
        payload.insert(
            "research_question".to_string(),
            serde_json::json!("long enough question"),
        );
        assert!(validate_field(&field, &payload).is_ok());

        payload.insert("research_question".to_string(), serde_json::json!("short"));
        assert!(validate_field(&field, &payload).is_err());

        payload.insert("research_question".to_string(), serde_json::json!(42));
        assert!(validate_field(&field, &payload).is_err());

        payload.remove("research_question");
        assert!(validate_field(&field, &payload).is_err());
    }

    #[test]
    fn test_optional_field_may_be_absent() {
        let field = InputField {
            name: "notes".to_string(),
            required: false,
            min_length: Some(5),
        };
        assert!(validate_field(&field, &serde_json::Map::new()).is_ok());
    }

    #[test]
    fn test_idempotency_key_stability() {
        let mut fields = serde_json::Map::new();
        fields.insert("q".to_string(), serde_json::json!("text"));

        let a = idempotency_key("wf-001", 2, &fields);
        let b = idempotency_key("wf-001", 2, &fields);
        let c = idempotency_key("wf-001", 3, &fields);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}
