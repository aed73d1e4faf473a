//! Stage worker pool.
//!
//! Workers pull jobs from the queue, mark them active, and drive the
//! orchestrator. Job-level retry applies only to transient failures,
//! bounded with exponential backoff; deterministic failures settle the
//! job on the first attempt.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::core::{Orchestrator, ProgressBroadcaster, StageRegistry};
use crate::domain::{JobError, JobEvent, JobResult, JobStatus};
use crate::error::ErrorCode;

use super::{JobQueue, JobStore};

/// Job-level retry for transient failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first try
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Backoff multiplier per attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Cap on the backoff delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    5_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_delay() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after a given attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

/// Fixed-concurrency pool of stage workers
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    store: Arc<JobStore>,
    stages: Arc<StageRegistry>,
    orchestrator: Arc<Orchestrator>,
    broadcaster: Arc<ProgressBroadcaster>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        store: Arc<JobStore>,
        stages: Arc<StageRegistry>,
        orchestrator: Arc<Orchestrator>,
        broadcaster: Arc<ProgressBroadcaster>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            queue,
            store,
            stages,
            orchestrator,
            broadcaster,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    /// Spawn the worker tasks; they run until `shutdown` flips to true.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.concurrency)
            .map(|worker_idx| {
                let pool = Arc::clone(self);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    info!(worker_idx, "Worker started");
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    info!(worker_idx, "Worker shutting down");
                                    break;
                                }
                            }
                            job_id = pool.queue.pop() => {
                                pool.process(job_id).await;
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Process queued jobs one at a time until the queue is empty.
    /// Used by the CLI to drive a submission to completion in-process.
    pub async fn drain(&self) {
        while let Some(job_id) = self.queue.try_pop() {
            self.process(job_id).await;
        }
    }

    /// Execute one job to a terminal status
    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn process(&self, job_id: Uuid) {
        let job = match self.store.get(job_id) {
            Some(job) => job,
            None => {
                error!("Queued job id has no job row, dropping");
                return;
            }
        };

        let stage = match self.stages.get(job.stage) {
            Some(stage) => stage.clone(),
            None => {
                // Gateway validates the stage number; missing here is
                // an integrity violation.
                self.finalize_failed(
                    job_id,
                    JobError {
                        code: ErrorCode::Fatal,
                        message: format!("no definition for stage {}", job.stage),
                        step: None,
                    },
                );
                return;
            }
        };

        let claim = self.store.update(job_id, |job| {
            job.processed_at = Some(chrono::Utc::now());
            job.advance(JobStatus::Active)
        });
        match claim {
            Ok(Ok(())) => {}
            Ok(Err(transition)) => {
                warn!(%transition, "Job not claimable, dropping");
                return;
            }
            Err(e) => {
                error!(error = %e, "Job row disappeared before claim");
                return;
            }
        }

        let mut attempt = 1u32;
        loop {
            let _ = self.store.update(job_id, |job| job.attempts = attempt);
            let last_attempt = attempt >= self.retry.max_attempts;

            match self
                .orchestrator
                .execute_stage(job_id, &stage, last_attempt)
                .await
            {
                Ok(success) => {
                    self.finalize_completed(job_id, success.artifacts, success.warnings);
                    return;
                }
                Err(failure) if failure.retryable => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        code = %failure.error.code,
                        "Transient failure, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => {
                    self.finalize_failed(job_id, failure.error);
                    return;
                }
            }
        }
    }

    fn finalize_completed(
        &self,
        job_id: Uuid,
        artifacts: Vec<crate::domain::ArtifactRef>,
        warnings: Vec<String>,
    ) {
        let result = self.store.update(job_id, |job| {
            job.finished_at = Some(chrono::Utc::now());
            job.result = Some(JobResult {
                artifacts,
                warnings,
            });
            job.recompute_progress();
            job.advance(JobStatus::Completed)
        });
        if let Ok(Err(transition)) = result {
            error!(%transition, "Completed job could not settle");
        }
        info!("Job completed");
    }

    fn finalize_failed(&self, job_id: Uuid, error: JobError) {
        // The orchestrator emits the terminal event for failures it
        // observed; integrity failures found here need their own.
        let already_terminal = self
            .broadcaster
            .history(job_id)
            .last()
            .map(JobEvent::is_terminal)
            .unwrap_or(false);
        if !already_terminal {
            self.broadcaster
                .publish(JobEvent::error(job_id, error.code, error.message.clone()));
        }

        let result = self.store.update(job_id, |job| {
            job.finished_at = Some(chrono::Utc::now());
            job.error = Some(error);
            job.advance(JobStatus::Failed)
        });
        if let Ok(Err(transition)) = result {
            error!(%transition, "Failed job could not settle");
        }
        warn!("Job failed");
    }
}
