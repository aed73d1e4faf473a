//! stagehand - stage dispatch and orchestration engine
//!
//! Executes one numbered stage of a multi-stage research pipeline as an
//! ordered sequence of steps, routing each step to a specialized
//! processing agent behind a uniform contract.
//!
//! # Architecture
//!
//! - Submissions enter through the gateway, which validates and
//!   enqueues a job
//! - A bounded worker pool pulls jobs and drives the orchestrator
//! - The orchestrator runs steps strictly in order, persisting one
//!   immutable artifact per step and consulting a per-step failure
//!   policy for the job's governance mode
//! - Every step call passes the PHI safety gate before any network
//!   egress and goes through the endpoint's circuit breaker
//! - Progress is broadcast per job as an append-only event log with
//!   replay-then-tail subscriptions
//!
//! # Modules
//!
//! - `adapters`: agent and PHI gate clients
//! - `core`: orchestration logic (stages, router, breakers, artifacts)
//! - `domain`: data structures (Job, StepRecord, Artifact, JobEvent)
//! - `queue`: job store, FIFO queue, worker pool
//! - `gateway`: submission validation and status snapshots
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Execute stage 2 of a workflow in LIVE mode
//! echo '{"research_question": "..."}' | stagehand run 2 -w wf-001
//!
//! # Validate routing before deployment
//! stagehand validate
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod queue;

// Re-export main types at crate root for convenience
pub use config::EngineConfig;
pub use core::{
    BreakerConfig, BreakerRegistry, FsArtifactStore, Mode, Orchestrator, ProgressBroadcaster,
    RouterDispatcher, StageRegistry,
};
pub use domain::{Job, JobEvent, JobStatus, StepStatus};
pub use error::{DispatchError, ErrorCode};
pub use gateway::{Gateway, SubmitRequest, SubmitResponse};
pub use queue::{JobQueue, JobStore, RetryPolicy, WorkerPool};
