//! Gateway submission validation, deduplication and status lookups.

mod common;

use common::{build_engine, review_payload, EngineOptions, PatternGate, ScriptedAgent};
use stagehand::error::ErrorCode;
use stagehand::gateway::{SubmitError, SubmitRequest};
use stagehand::{JobStatus, Mode};

fn request(workflow_id: &str) -> SubmitRequest {
    SubmitRequest {
        workflow_id: workflow_id.to_string(),
        mode: Mode::Live,
        fields: review_payload(),
    }
}

#[tokio::test]
async fn rejected_submission_creates_no_job() {
    let engine = build_engine(
        ScriptedAgent::new(),
        PatternGate::clean(),
        EngineOptions::default(),
    );

    // Bad workflow id
    let err = engine
        .gateway
        .submit(2, request("has spaces!"))
        .unwrap_err();
    assert!(matches!(err, SubmitError::WorkflowId { .. }));
    assert_eq!(err.code(), ErrorCode::ValidationError);

    // Unknown stage
    let err = engine.gateway.submit(99, request("wf-001")).unwrap_err();
    assert!(matches!(err, SubmitError::UnknownStage { stage: 99 }));

    // Field below its minimum length
    let mut short = request("wf-001");
    short.fields.insert(
        "research_question".to_string(),
        serde_json::json!("short"),
    );
    let err = engine.gateway.submit(2, short).unwrap_err();
    assert!(matches!(err, SubmitError::Field { .. }));

    // Missing required field
    let mut missing = request("wf-001");
    missing.fields.remove("research_question");
    let err = engine.gateway.submit(2, missing).unwrap_err();
    assert!(matches!(err, SubmitError::Field { .. }));

    assert!(engine.store.is_empty());
}

#[tokio::test]
async fn identical_submission_returns_the_existing_job() {
    let engine = build_engine(
        ScriptedAgent::new(),
        PatternGate::clean(),
        EngineOptions::default(),
    );

    let first = engine.gateway.submit(2, request("wf-001")).unwrap();
    assert!(!first.deduplicated);

    let second = engine.gateway.submit(2, request("wf-001")).unwrap();
    assert!(second.deduplicated);
    assert_eq!(second.job_id, first.job_id);
    assert_eq!(engine.store.len(), 1);

    // A different workflow id is a different submission
    let third = engine.gateway.submit(2, request("wf-002")).unwrap();
    assert!(!third.deduplicated);
    assert_ne!(third.job_id, first.job_id);

    // So is a different payload under the same workflow
    let mut reworded = request("wf-001");
    reworded.fields.insert(
        "research_question".to_string(),
        serde_json::json!("Does early mobilization shorten hospital stays?"),
    );
    let fourth = engine.gateway.submit(2, reworded).unwrap();
    assert!(!fourth.deduplicated);
    assert_eq!(engine.store.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_submissions_create_one_job() {
    let engine = build_engine(
        ScriptedAgent::new(),
        PatternGate::clean(),
        EngineOptions::default(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let gateway = std::sync::Arc::clone(&engine.gateway);
            tokio::spawn(async move { gateway.submit(2, request("wf-race")).unwrap().job_id })
        })
        .collect();

    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(engine.store.len(), 1);
}

#[tokio::test]
async fn duplicate_after_completion_still_returns_the_finished_job() {
    let engine = build_engine(
        ScriptedAgent::new(),
        PatternGate::clean(),
        EngineOptions::default(),
    );

    let first = engine.gateway.submit(2, request("wf-001")).unwrap();
    engine.pool.drain().await;

    let second = engine.gateway.submit(2, request("wf-001")).unwrap();
    assert!(second.deduplicated);
    assert_eq!(second.job_id, first.job_id);
    assert_eq!(second.status, JobStatus::Completed);
}

#[tokio::test]
async fn reaping_a_finished_job_clears_its_dedup_entry() {
    let engine = build_engine(
        ScriptedAgent::new(),
        PatternGate::clean(),
        EngineOptions {
            event_retention: std::time::Duration::from_millis(20),
            ..EngineOptions::default()
        },
    );

    let first = engine.gateway.submit(2, request("wf-001")).unwrap();
    engine.pool.drain().await;

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(engine.gateway.reap_expired(), 1);

    // The slot is free again; the same payload creates a fresh job
    let second = engine.gateway.submit(2, request("wf-001")).unwrap();
    assert!(!second.deduplicated);
    assert_ne!(second.job_id, first.job_id);
}

#[tokio::test]
async fn status_and_subscribe_reject_unknown_job_ids() {
    let engine = build_engine(
        ScriptedAgent::new(),
        PatternGate::clean(),
        EngineOptions::default(),
    );

    let bogus = uuid::Uuid::new_v4();
    assert!(engine.gateway.status(bogus).is_err());
    assert!(engine.gateway.subscribe(bogus).is_err());
}

#[tokio::test]
async fn queued_status_shows_pending_steps_and_zero_progress() {
    let engine = build_engine(
        ScriptedAgent::new(),
        PatternGate::clean(),
        EngineOptions::default(),
    );

    let response = engine.gateway.submit(2, request("wf-001")).unwrap();

    let status = engine.gateway.status(response.job_id).unwrap();
    assert_eq!(status.status, JobStatus::Queued);
    assert_eq!(status.progress, 0);
    assert_eq!(status.step_statuses.len(), 6);
    assert!(status
        .step_statuses
        .iter()
        .all(|s| s.status == stagehand::StepStatus::Pending));
    assert!(status.result.is_none());
    assert!(status.error.is_none());
}
