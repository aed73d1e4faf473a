//! Per-job progress broadcasting.
//!
//! Each job owns an append-only event log plus a live broadcast
//! channel. A subscriber first receives the buffered history and then
//! tails live events, so late subscribers see the full sequence.
//! Channels are kept for a grace period after the terminal event and
//! reclaimed by `reap_expired`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::domain::JobEvent;

const LIVE_CHANNEL_CAPACITY: usize = 64;

struct JobChannel {
    history: Vec<JobEvent>,
    live: broadcast::Sender<JobEvent>,
    terminated_at: Option<Instant>,
}

impl JobChannel {
    fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            history: Vec::new(),
            live,
            terminated_at: None,
        }
    }
}

/// A replay-then-tail subscription to one job's events
pub struct Subscription {
    /// Buffered events up to the moment of subscription
    pub history: Vec<JobEvent>,

    /// Live events appended after subscription
    pub live: broadcast::Receiver<JobEvent>,
}

/// Append-only event log per job id
pub struct ProgressBroadcaster {
    channels: Mutex<HashMap<Uuid, JobChannel>>,

    /// How long a terminated channel is retained before reclamation
    retention: Duration,
}

impl ProgressBroadcaster {
    pub fn new(retention: Duration) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Register a channel for a new job
    pub fn register(&self, job_id: Uuid) {
        let mut channels = self.channels.lock().expect("broadcaster lock poisoned");
        channels.entry(job_id).or_insert_with(JobChannel::new);
    }

    /// Append an event to the job's log and push it to live subscribers.
    ///
    /// A terminal event starts the retention clock for the channel.
    pub fn publish(&self, event: JobEvent) {
        let mut channels = self.channels.lock().expect("broadcaster lock poisoned");
        let channel = channels.entry(event.job_id).or_insert_with(JobChannel::new);

        if event.is_terminal() {
            channel.terminated_at = Some(Instant::now());
        }

        channel.history.push(event.clone());
        // No live subscribers is fine; history still accumulates
        let _ = channel.live.send(event);
    }

    /// Subscribe to a job's events: full history so far, then live tail.
    pub fn subscribe(&self, job_id: Uuid) -> Option<Subscription> {
        let channels = self.channels.lock().expect("broadcaster lock poisoned");
        let channel = channels.get(&job_id)?;

        Some(Subscription {
            history: channel.history.clone(),
            live: channel.live.subscribe(),
        })
    }

    /// Whether a channel still exists for a job
    pub fn contains(&self, job_id: Uuid) -> bool {
        self.channels
            .lock()
            .expect("broadcaster lock poisoned")
            .contains_key(&job_id)
    }

    /// Snapshot of a job's buffered events
    pub fn history(&self, job_id: Uuid) -> Vec<JobEvent> {
        let channels = self.channels.lock().expect("broadcaster lock poisoned");
        channels
            .get(&job_id)
            .map(|c| c.history.clone())
            .unwrap_or_default()
    }

    /// Drop channels whose terminal event is older than the retention
    /// period. Returns how many were reclaimed.
    pub fn reap_expired(&self) -> usize {
        let mut channels = self.channels.lock().expect("broadcaster lock poisoned");
        let retention = self.retention;
        let before = channels.len();

        channels.retain(|job_id, channel| {
            let expired = channel
                .terminated_at
                .map(|t| t.elapsed() >= retention)
                .unwrap_or(false);
            if expired {
                debug!(%job_id, "Reclaiming expired event channel");
            }
            !expired
        });

        before - channels.len()
    }
}
