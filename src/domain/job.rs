//! Job and step state.
//!
//! A Job is one queued execution of a numbered stage for a workflow.
//! Status transitions are forward-only; an attempted revert is an error
//! rather than a silent overwrite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::stage::Mode;
use crate::error::ErrorCode;

use super::artifact::ArtifactRef;

/// A single stage execution owned by the worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job
    pub id: Uuid,

    /// Workflow this job belongs to
    pub workflow_id: String,

    /// Numbered stage to execute
    pub stage: u32,

    /// Governance mode for this execution
    pub mode: Mode,

    /// Original request payload (stage-specific fields)
    pub request: serde_json::Map<String, serde_json::Value>,

    /// Current status (forward-only)
    pub status: JobStatus,

    /// Number of execution attempts so far
    pub attempts: u32,

    /// Percent of steps completed (0-100)
    pub progress: u8,

    /// Per-step records in stage order
    pub steps: Vec<StepRecord>,

    /// When the job was submitted
    pub created_at: DateTime<Utc>,

    /// When a worker first picked the job up
    pub processed_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,

    /// Result summary (terminal, completed only)
    pub result: Option<JobResult>,

    /// Structured error (terminal, failed only)
    pub error: Option<JobError>,

    /// Cooperative abort flag, checked between steps only
    #[serde(default)]
    pub abort_requested: bool,
}

impl Job {
    /// Create a new queued job for a stage submission
    pub fn new(
        workflow_id: String,
        stage: u32,
        mode: Mode,
        request: serde_json::Map<String, serde_json::Value>,
        step_names: &[String],
    ) -> Self {
        let steps = step_names
            .iter()
            .enumerate()
            .map(|(index, name)| StepRecord::pending(name.clone(), index))
            .collect();

        Self {
            id: Uuid::new_v4(),
            workflow_id,
            stage,
            mode,
            request,
            status: JobStatus::Queued,
            attempts: 0,
            progress: 0,
            steps,
            created_at: Utc::now(),
            processed_at: None,
            finished_at: None,
            result: None,
            error: None,
            abort_requested: false,
        }
    }

    /// Advance the job status. Reverting to an earlier status is rejected.
    pub fn advance(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if to.rank() < self.status.rank() {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Whether the job has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    /// Recompute progress from step records (done and failed count as finished)
    pub fn recompute_progress(&mut self) {
        if self.steps.is_empty() {
            return;
        }
        let finished = self
            .steps
            .iter()
            .filter(|s| {
                matches!(
                    s.status,
                    StepStatus::Done | StepStatus::Failed | StepStatus::Skipped
                )
            })
            .count();
        self.progress = ((finished * 100) / self.steps.len()) as u8;
    }

    /// Mutable access to a step record by name
    pub fn step_mut(&mut self, name: &str) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|s| s.name == name)
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue
    Queued,

    /// Claimed by a worker, executing
    Active,

    /// All strict steps succeeded
    Completed,

    /// A strict step failed or the job was aborted
    Failed,
}

impl JobStatus {
    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Active => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

/// Rejected backward status transition
#[derive(Debug, Clone, Copy, Error)]
#[error("invalid job transition: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Status of a single step within a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Done,

    /// Failed (strict or best-effort)
    Failed,

    /// Never run because an earlier strict step failed or the job aborted
    Skipped,
}

impl StepStatus {
    /// Once a step has settled it must not go back to pending/running.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Per-step record owned by the orchestrator for one job execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step name (unique within the stage)
    pub name: String,

    /// Fixed order index within the stage
    pub index: usize,

    /// Current status
    pub status: StepStatus,

    /// When the step started running
    pub started_at: Option<DateTime<Utc>>,

    /// When the step settled
    pub finished_at: Option<DateTime<Utc>>,

    /// Reference to the persisted artifact (done steps)
    pub artifact: Option<ArtifactRef>,

    /// Error code if the step failed
    pub error_code: Option<ErrorCode>,
}

impl StepRecord {
    /// Create a pending record for a stage step
    pub fn pending(name: String, index: usize) -> Self {
        Self {
            name,
            index,
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            artifact: None,
            error_code: None,
        }
    }

    /// Move the step to a settled or running status, refusing reverts.
    pub fn set_status(&mut self, status: StepStatus) {
        if self.status.is_settled() {
            return;
        }
        match status {
            StepStatus::Running => self.started_at = Some(Utc::now()),
            StepStatus::Done | StepStatus::Failed | StepStatus::Skipped => {
                self.finished_at = Some(Utc::now())
            }
            StepStatus::Pending => {}
        }
        self.status = status;
    }
}

/// Result summary for a completed job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// References to the artifacts persisted by this job
    pub artifacts: Vec<ArtifactRef>,

    /// Warnings from best-effort step failures (DEMO mode)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Structured error payload for a failed job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Taxonomy code
    pub code: ErrorCode,

    /// Human-readable message (no PHI, no stack traces)
    pub message: String,

    /// Step that caused the failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}
