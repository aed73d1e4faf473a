//! Domain types for the stage engine.
//!
//! This module contains the core data structures:
//! - Job: one queued execution of a stage, with forward-only status
//! - StepRecord: per-step status inside a job
//! - Artifact: immutable step outputs keyed by (workflow, stage, step)
//! - JobEvent: progress/terminal events broadcast per job

pub mod artifact;
pub mod events;
pub mod job;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactKey, ArtifactRef};
pub use events::{JobEvent, JobEventKind};
pub use job::{Job, JobError, JobResult, JobStatus, StepRecord, StepStatus, TransitionError};
