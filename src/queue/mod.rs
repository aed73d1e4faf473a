//! Job persistence and FIFO queue.
//!
//! The store owns job rows; the queue owns delivery order. Popping
//! removes the id from the queue, so no two workers can claim the same
//! job. The broker behind this surface is externally replaceable; the
//! in-process implementation is a VecDeque plus a Notify.

pub mod worker;

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::domain::Job;

pub use worker::{RetryPolicy, WorkerPool};

/// Store/queue failures
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(Uuid),
}

/// In-memory job rows keyed by job id
#[derive(Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly created job
    pub fn insert(&self, job: Job) {
        let mut jobs = self.jobs.lock().expect("job store lock poisoned");
        jobs.insert(job.id, job);
    }

    /// Snapshot of a job row
    pub fn get(&self, id: Uuid) -> Option<Job> {
        let jobs = self.jobs.lock().expect("job store lock poisoned");
        jobs.get(&id).cloned()
    }

    /// Apply a mutation to a job row under the store lock
    pub fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut Job) -> R) -> Result<R, QueueError> {
        let mut jobs = self.jobs.lock().expect("job store lock poisoned");
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        Ok(f(job))
    }

    /// Request a cooperative abort; honored between steps only
    pub fn request_abort(&self, id: Uuid) -> Result<(), QueueError> {
        self.update(id, |job| job.abort_requested = true)
    }

    /// Number of stored jobs
    pub fn len(&self) -> usize {
        self.jobs.lock().expect("job store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// FIFO queue with exclusive delivery per job
#[derive(Default)]
pub struct JobQueue {
    pending: Mutex<VecDeque<Uuid>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job id
    pub fn push(&self, id: Uuid) {
        {
            let mut pending = self.pending.lock().expect("queue lock poisoned");
            pending.push_back(id);
        }
        self.notify.notify_one();
    }

    /// Pop the next job id without waiting
    pub fn try_pop(&self) -> Option<Uuid> {
        let mut pending = self.pending.lock().expect("queue lock poisoned");
        pending.pop_front()
    }

    /// Wait for and pop the next job id
    pub async fn pop(&self) -> Uuid {
        loop {
            if let Some(id) = self.try_pop() {
                return id;
            }
            self.notify.notified().await;
        }
    }

    /// Number of queued jobs
    pub fn len(&self) -> usize {
        self.pending.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
