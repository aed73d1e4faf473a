//! Stage execution orchestrator.
//!
//! Runs a stage's fixed ordered step list for one job: builds each
//! step's input from the original request plus prior step outputs,
//! dispatches through the router, persists artifacts, applies the
//! per-step failure policy for the job's mode, and emits progress and
//! terminal events.
//!
//! Retry interplay: a transient failure of a strict step does not
//! settle the step when another attempt remains; the worker re-invokes
//! the whole stage. On resume, settled steps are replayed from their
//! records instead of re-dispatched: done steps contribute their
//! persisted artifact, failed best-effort steps contribute their
//! warning. Step statuses and the event stream therefore stay
//! monotonic across attempts.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Artifact, ArtifactKey, ArtifactRef, JobError, JobEvent, StepStatus};
use crate::error::ErrorCode;
use crate::queue::JobStore;

use super::artifact_store::{ArtifactStoreError, FsArtifactStore};
use super::broadcaster::ProgressBroadcaster;
use super::router::RouterDispatcher;
use super::stage::{FailurePolicy, StageDefinition};

/// Outcome of a completed stage execution
#[derive(Debug, Clone)]
pub struct StageSuccess {
    /// One artifact reference per done step, in step order
    pub artifacts: Vec<ArtifactRef>,

    /// Warnings from best-effort step failures
    pub warnings: Vec<String>,
}

/// Outcome of a failed or aborted stage execution
#[derive(Debug, Clone)]
pub struct StageFailure {
    /// Structured error for the job row
    pub error: JobError,

    /// Whether the worker may retry this attempt
    pub retryable: bool,
}

/// Runs stages step by step for the worker pool
pub struct Orchestrator {
    dispatcher: Arc<RouterDispatcher>,
    artifacts: Arc<FsArtifactStore>,
    broadcaster: Arc<ProgressBroadcaster>,
    store: Arc<JobStore>,
}

impl Orchestrator {
    pub fn new(
        dispatcher: Arc<RouterDispatcher>,
        artifacts: Arc<FsArtifactStore>,
        broadcaster: Arc<ProgressBroadcaster>,
        store: Arc<JobStore>,
    ) -> Self {
        Self {
            dispatcher,
            artifacts,
            broadcaster,
            store,
        }
    }

    /// Execute every step of a stage in order for one job attempt.
    ///
    /// `last_attempt` controls whether a transient strict-step failure
    /// is surfaced as retryable or settles the job.
    #[instrument(skip(self, stage), fields(job_id = %job_id, stage = stage.stage))]
    pub async fn execute_stage(
        &self,
        job_id: Uuid,
        stage: &StageDefinition,
        last_attempt: bool,
    ) -> Result<StageSuccess, StageFailure> {
        let job = match self.store.get(job_id) {
            Some(job) => job,
            None => {
                return Err(self.fatal_failure(job_id, None, "job row missing at execution"));
            }
        };

        info!(workflow = %job.workflow_id, mode = ?job.mode, "Executing stage");

        let mut outputs: HashMap<String, serde_json::Value> = HashMap::new();
        let mut refs: Vec<ArtifactRef> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        for (step_idx, step) in stage.steps.iter().enumerate() {
            // Cooperative abort, checked between steps only
            let aborted = self
                .store
                .get(job_id)
                .map(|j| j.abort_requested)
                .unwrap_or(false);
            if aborted {
                warn!(step = %step.name, "Abort requested, skipping remaining steps");
                self.skip_remaining(job_id, stage, step_idx);
                let error = JobError {
                    code: ErrorCode::Fatal,
                    message: "job aborted by operator".to_string(),
                    step: None,
                };
                self.broadcaster
                    .publish(JobEvent::error(job_id, error.code, error.message.clone()));
                return Err(StageFailure {
                    error,
                    retryable: false,
                });
            }

            let key = ArtifactKey::new(job.workflow_id.clone(), stage.stage, step.name.clone());

            // A prior attempt may already have settled this step.
            // Replay the recorded outcome; a settled step is never
            // re-dispatched and emits no further events.
            if let Some(record) = job.steps.iter().find(|r| r.name == step.name) {
                match record.status {
                    StepStatus::Pending | StepStatus::Running => {}
                    StepStatus::Done => {
                        match self.artifacts.load(&key).await {
                            Ok(Some(existing)) => {
                                debug!(step = %step.name, "Step already done, reusing artifact");
                                outputs.insert(step.name.clone(), existing.payload.clone());
                                refs.push(existing.reference());
                            }
                            Ok(None) => {
                                error!(step = %step.name, "Done step has no artifact");
                                return Err(self.fatal_failure(
                                    job_id,
                                    Some(step.name.clone()),
                                    "artifact missing for completed step",
                                ));
                            }
                            Err(e) => {
                                error!(step = %step.name, error = %e, "Artifact store read failed");
                                return Err(self.fatal_failure(
                                    job_id,
                                    Some(step.name.clone()),
                                    "artifact store read failed",
                                ));
                            }
                        }
                        continue;
                    }
                    StepStatus::Failed => {
                        // Best-effort failure from an earlier attempt;
                        // its warning must survive the retry.
                        let code = record.error_code.unwrap_or(ErrorCode::AgentError);
                        debug!(step = %step.name, "Step already failed, keeping warning");
                        warnings.push(format!("step '{}' failed: {}", step.name, code));
                        continue;
                    }
                    StepStatus::Skipped => continue,
                }
            }

            // An earlier job for the same workflow stage may have left
            // an artifact under this key; reuse it too.
            match self.artifacts.load(&key).await {
                Ok(Some(existing)) => {
                    debug!(step = %step.name, "Artifact exists, reusing prior output");
                    outputs.insert(step.name.clone(), existing.payload.clone());
                    refs.push(existing.reference());
                    self.mark_step(job_id, &step.name, StepStatus::Done, None, Some(existing.reference()));
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(step = %step.name, error = %e, "Artifact store read failed");
                    return Err(self.fatal_failure(
                        job_id,
                        Some(step.name.clone()),
                        "artifact store read failed",
                    ));
                }
            }

            self.mark_step(job_id, &step.name, StepStatus::Running, None, None);
            self.broadcaster
                .publish(JobEvent::progress(job_id, &step.name, StepStatus::Running));

            let input = build_step_input(&job.request, &outputs);

            match self.dispatcher.dispatch(&step.task_type, &input).await {
                Ok(output) => {
                    let artifact = Artifact::from_output(key, output.clone());
                    if let Err(e) = self.persist(&artifact).await {
                        error!(step = %step.name, error = %e, "Artifact write failed");
                        return Err(self.fatal_failure(
                            job_id,
                            Some(step.name.clone()),
                            "artifact write failed",
                        ));
                    }

                    outputs.insert(step.name.clone(), output);
                    refs.push(artifact.reference());
                    self.mark_step(
                        job_id,
                        &step.name,
                        StepStatus::Done,
                        None,
                        Some(artifact.reference()),
                    );
                    self.broadcaster
                        .publish(JobEvent::progress(job_id, &step.name, StepStatus::Done));
                }
                Err(dispatch_err) => {
                    let code = dispatch_err.code();
                    let policy = stage.policy(step, job.mode);

                    match policy {
                        FailurePolicy::BestEffort => {
                            warn!(
                                step = %step.name,
                                code = %code,
                                error = %dispatch_err,
                                "Best-effort step failed, continuing"
                            );
                            warnings.push(format!("step '{}' failed: {}", step.name, code));
                            self.mark_step(job_id, &step.name, StepStatus::Failed, Some(code), None);
                            self.broadcaster.publish(JobEvent::progress(
                                job_id,
                                &step.name,
                                StepStatus::Failed,
                            ));
                        }
                        FailurePolicy::Strict => {
                            let retryable = code.is_retryable() && !last_attempt;
                            if retryable {
                                // Leave the step unsettled; the next
                                // attempt re-runs it from the artifact
                                // checkpoint.
                                warn!(
                                    step = %step.name,
                                    code = %code,
                                    error = %dispatch_err,
                                    "Transient strict-step failure, attempt will be retried"
                                );
                                return Err(StageFailure {
                                    error: JobError {
                                        code,
                                        message: dispatch_err.to_string(),
                                        step: Some(step.name.clone()),
                                    },
                                    retryable: true,
                                });
                            }

                            error!(
                                step = %step.name,
                                code = %code,
                                error = %dispatch_err,
                                "Strict step failed, aborting job"
                            );
                            self.mark_step(job_id, &step.name, StepStatus::Failed, Some(code), None);
                            self.broadcaster.publish(JobEvent::progress(
                                job_id,
                                &step.name,
                                StepStatus::Failed,
                            ));
                            self.skip_remaining(job_id, stage, step_idx + 1);

                            let error = JobError {
                                code,
                                message: dispatch_err.to_string(),
                                step: Some(step.name.clone()),
                            };
                            self.broadcaster.publish(JobEvent::error(
                                job_id,
                                error.code,
                                error.message.clone(),
                            ));
                            return Err(StageFailure {
                                error,
                                retryable: false,
                            });
                        }
                    }
                }
            }
        }

        info!(
            artifacts = refs.len(),
            warnings = warnings.len(),
            "Stage completed"
        );
        self.broadcaster
            .publish(JobEvent::complete(job_id, refs.clone(), warnings.clone()));

        Ok(StageSuccess {
            artifacts: refs,
            warnings,
        })
    }

    /// Persist an artifact, tolerating a concurrent-attempt duplicate
    async fn persist(&self, artifact: &Artifact) -> Result<(), ArtifactStoreError> {
        match self.artifacts.put(artifact).await {
            Ok(()) => Ok(()),
            // Key already written by an earlier attempt of this job;
            // the stored value wins.
            Err(ArtifactStoreError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Settle a step record and refresh job progress
    fn mark_step(
        &self,
        job_id: Uuid,
        step: &str,
        status: StepStatus,
        error_code: Option<ErrorCode>,
        artifact: Option<ArtifactRef>,
    ) {
        let _ = self.store.update(job_id, |job| {
            if let Some(record) = job.step_mut(step) {
                record.set_status(status);
                if record.error_code.is_none() {
                    record.error_code = error_code;
                }
                if record.artifact.is_none() {
                    record.artifact = artifact;
                }
            }
            job.recompute_progress();
        });
    }

    /// Mark every step from `from_idx` onward as skipped
    fn skip_remaining(&self, job_id: Uuid, stage: &StageDefinition, from_idx: usize) {
        for step in stage.steps.iter().skip(from_idx) {
            self.mark_step(job_id, &step.name, StepStatus::Skipped, None, None);
            self.broadcaster
                .publish(JobEvent::progress(job_id, &step.name, StepStatus::Skipped));
        }
    }

    /// Terminal integrity failure: event plus structured error
    fn fatal_failure(&self, job_id: Uuid, step: Option<String>, message: &str) -> StageFailure {
        let error = JobError {
            code: ErrorCode::Fatal,
            message: message.to_string(),
            step,
        };
        self.broadcaster
            .publish(JobEvent::error(job_id, error.code, error.message.clone()));
        StageFailure {
            error,
            retryable: false,
        }
    }
}

/// Assemble a step's input: the original request plus prior outputs
fn build_step_input(
    request: &serde_json::Map<String, serde_json::Value>,
    outputs: &HashMap<String, serde_json::Value>,
) -> serde_json::Value {
    let mut prior = serde_json::Map::new();
    for (name, payload) in outputs {
        prior.insert(name.clone(), payload.clone());
    }

    serde_json::json!({
        "request": serde_json::Value::Object(request.clone()),
        "artifacts": serde_json::Value::Object(prior),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_input_includes_request_and_prior_outputs() {
        let mut request = serde_json::Map::new();
        request.insert(
            "research_question".to_string(),
            serde_json::json!("effect of X on Y"),
        );

        let mut outputs = HashMap::new();
        outputs.insert("extract".to_string(), serde_json::json!({"rows": 4}));

        let input = build_step_input(&request, &outputs);

        assert_eq!(input["request"]["research_question"], "effect of X on Y");
        assert_eq!(input["artifacts"]["extract"]["rows"], 4);
    }

    #[test]
    fn test_step_input_with_no_prior_outputs() {
        let input = build_step_input(&serde_json::Map::new(), &HashMap::new());
        assert!(input["artifacts"].as_object().unwrap().is_empty());
    }
}
