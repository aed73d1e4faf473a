//! Progress events broadcast per job.
//!
//! Each job owns an append-only event log: one progress event per step
//! status change, followed by exactly one terminal event. Subscribers
//! replay buffered history and then tail live events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;

use super::artifact::ArtifactRef;
use super::job::StepStatus;

/// A single entry in a job's event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// The job this event belongs to
    pub job_id: Uuid,

    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// Event payload
    #[serde(flatten)]
    pub kind: JobEventKind,
}

impl JobEvent {
    /// Step lifecycle event
    pub fn progress(job_id: Uuid, step: impl Into<String>, status: StepStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            timestamp: Utc::now(),
            kind: JobEventKind::Progress {
                step: step.into(),
                status,
            },
        }
    }

    /// Terminal success event
    pub fn complete(job_id: Uuid, artifacts: Vec<ArtifactRef>, warnings: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            timestamp: Utc::now(),
            kind: JobEventKind::Complete {
                artifacts,
                warnings,
            },
        }
    }

    /// Terminal failure event
    pub fn error(job_id: Uuid, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            timestamp: Utc::now(),
            kind: JobEventKind::Error {
                code,
                message: message.into(),
            },
        }
    }

    /// Whether this event terminates the job's stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            JobEventKind::Complete { .. } | JobEventKind::Error { .. }
        )
    }
}

/// Event payload variants, tagged on the wire as `{"event": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEventKind {
    /// A step changed status
    Progress { step: String, status: StepStatus },

    /// The job finished; all strict steps succeeded
    Complete {
        artifacts: Vec<ArtifactRef>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },

    /// The job failed with a structured error
    Error { code: ErrorCode, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_wire_format() {
        let event = JobEvent::progress(Uuid::new_v4(), "extract", StepStatus::Running);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "progress");
        assert_eq!(json["step"], "extract");
        assert_eq!(json["status"], "running");
    }

    #[test]
    fn test_terminal_detection() {
        let job_id = Uuid::new_v4();
        assert!(!JobEvent::progress(job_id, "extract", StepStatus::Done).is_terminal());
        assert!(JobEvent::complete(job_id, vec![], vec![]).is_terminal());
        assert!(JobEvent::error(job_id, ErrorCode::AgentError, "boom").is_terminal());
    }

    #[test]
    fn test_event_round_trip() {
        let event = JobEvent::error(Uuid::new_v4(), ErrorCode::PhiBlocked, "flagged input");
        let json = serde_json::to_string(&event).unwrap();
        let parsed: JobEvent = serde_json::from_str(&json).unwrap();

        match parsed.kind {
            JobEventKind::Error { code, .. } => assert_eq!(code, ErrorCode::PhiBlocked),
            other => panic!("unexpected kind: {:?}", other),
        }
    }
}
