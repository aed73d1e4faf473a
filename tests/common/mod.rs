//! Shared test harness: scripted agents, a pattern-matching PHI gate,
//! and an engine wired with in-process queue and tempdir artifacts.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use stagehand::adapters::{
    AgentCallError, AgentClient, AgentRequest, AgentResponse, PhiGate, ScanResult,
};
use stagehand::core::router::{AgentEndpoint, AgentRegistry};
use stagehand::core::{
    BreakerConfig, BreakerRegistry, FsArtifactStore, Orchestrator, ProgressBroadcaster,
    RouterDispatcher, StageRegistry,
};
use stagehand::gateway::Gateway;
use stagehand::queue::{JobQueue, JobStore, RetryPolicy, WorkerPool};

/// Scripted response for one agent call
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Respond success=true with this output
    Succeed(serde_json::Value),

    /// Respond success=false with this error message
    Fail(String),

    /// Transport-level network failure
    Network(String),

    /// Stall long enough for the dispatcher timeout to fire
    Hang(Duration),
}

/// Mock agent with per-task-type scripts and invocation counters
#[derive(Default)]
pub struct ScriptedAgent {
    scripts: Mutex<HashMap<String, VecDeque<Behavior>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue behaviors for a task type; once drained, calls succeed
    /// with a default payload.
    pub fn script(&self, task_type: &str, behaviors: Vec<Behavior>) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .entry(task_type.to_string())
            .or_default()
            .extend(behaviors);
    }

    /// How many run calls reached this task type's agent
    pub fn calls(&self, task_type: &str) -> usize {
        *self.calls.lock().unwrap().get(task_type).unwrap_or(&0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    async fn run(
        &self,
        _address: &str,
        request: &AgentRequest,
    ) -> Result<AgentResponse, AgentCallError> {
        {
            let mut calls = self.calls.lock().unwrap();
            *calls.entry(request.task_type.clone()).or_insert(0) += 1;
        }

        let behavior = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts
                .get_mut(&request.task_type)
                .and_then(|queue| queue.pop_front())
        };

        match behavior {
            None => Ok(AgentResponse {
                success: true,
                output: Some(serde_json::json!({ "task": request.task_type })),
                error: None,
            }),
            Some(Behavior::Succeed(output)) => Ok(AgentResponse {
                success: true,
                output: Some(output),
                error: None,
            }),
            Some(Behavior::Fail(message)) => Ok(AgentResponse {
                success: false,
                output: None,
                error: Some(message),
            }),
            Some(Behavior::Network(message)) => Err(AgentCallError::Network(message)),
            Some(Behavior::Hang(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(AgentResponse {
                    success: true,
                    output: Some(serde_json::json!({ "task": request.task_type })),
                    error: None,
                })
            }
        }
    }

    async fn health_check(&self, _address: &str) -> Result<()> {
        Ok(())
    }
}

/// Gate that flags any text containing a configured pattern
pub struct PatternGate {
    pattern: Option<String>,
    scans: AtomicUsize,
}

impl PatternGate {
    /// A gate that never flags
    pub fn clean() -> Arc<Self> {
        Arc::new(Self {
            pattern: None,
            scans: AtomicUsize::new(0),
        })
    }

    /// A gate that flags text containing `pattern`
    pub fn flagging(pattern: &str) -> Arc<Self> {
        Arc::new(Self {
            pattern: Some(pattern.to_string()),
            scans: AtomicUsize::new(0),
        })
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhiGate for PatternGate {
    async fn scan(&self, text: &str) -> Result<ScanResult> {
        self.scans.fetch_add(1, Ordering::SeqCst);

        let flagged = self
            .pattern
            .as_deref()
            .map(|p| text.contains(p))
            .unwrap_or(false);

        Ok(ScanResult {
            flagged,
            spans: Vec::new(),
        })
    }
}

/// Everything a scenario needs, wired together
pub struct TestEngine {
    pub gateway: Arc<Gateway>,
    pub pool: Arc<WorkerPool>,
    pub store: Arc<JobStore>,
    pub broadcaster: Arc<ProgressBroadcaster>,
    pub artifacts: Arc<FsArtifactStore>,
    _state: TempDir,
}

/// Six-step review stage used by the end-to-end scenarios
pub const REVIEW_STAGE_YAML: &str = r#"
stages:
  - stage: 2
    name: literature_review
    inputs:
      - name: research_question
        min_length: 10
    steps:
      - name: screen
        task_type: screening
      - name: fetch
        task_type: retrieval
      - name: extract
        task_type: extraction
      - name: appraise
        task_type: appraisal
        demo_policy: best_effort
      - name: synthesize
        task_type: synthesis
      - name: report
        task_type: reporting
"#;

pub struct EngineOptions {
    pub stages_yaml: &'static str,
    pub call_timeout: Duration,
    pub event_retention: Duration,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            stages_yaml: REVIEW_STAGE_YAML,
            call_timeout: Duration::from_millis(100),
            event_retention: Duration::from_secs(60),
            retry: RetryPolicy {
                max_attempts: 1,
                initial_delay_ms: 1,
                backoff_multiplier: 2.0,
                max_delay_ms: 10,
            },
            breaker: BreakerConfig::default(),
        }
    }
}

/// Wire an engine around a scripted agent and a gate
pub fn build_engine(
    agent: Arc<ScriptedAgent>,
    gate: Arc<dyn PhiGate>,
    options: EngineOptions,
) -> TestEngine {
    let stages = Arc::new(StageRegistry::from_yaml(options.stages_yaml).unwrap());

    let endpoints = stages
        .task_types()
        .into_iter()
        .map(|task_type| AgentEndpoint {
            task_type: task_type.to_string(),
            address: format!("mock://{}", task_type),
        })
        .collect();
    let registry = AgentRegistry::new(endpoints);
    registry.validate_stages(&stages).unwrap();

    let breakers = Arc::new(BreakerRegistry::new(options.breaker));
    let dispatcher = Arc::new(RouterDispatcher::new(
        registry,
        breakers,
        gate,
        agent,
        options.call_timeout,
    ));

    let state = TempDir::new().unwrap();
    let artifacts = Arc::new(FsArtifactStore::new(state.path().join("artifacts")));
    let broadcaster = Arc::new(ProgressBroadcaster::new(options.event_retention));
    let store = Arc::new(JobStore::new());
    let queue = Arc::new(JobQueue::new());

    let orchestrator = Arc::new(Orchestrator::new(
        dispatcher,
        Arc::clone(&artifacts),
        Arc::clone(&broadcaster),
        Arc::clone(&store),
    ));

    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&queue),
        Arc::clone(&store),
        Arc::clone(&stages),
        orchestrator,
        Arc::clone(&broadcaster),
        options.retry,
        2,
    ));

    let gateway = Arc::new(Gateway::new(
        stages,
        Arc::clone(&store),
        queue,
        Arc::clone(&broadcaster),
    ));

    TestEngine {
        gateway,
        pool,
        store,
        broadcaster,
        artifacts,
        _state: state,
    }
}

/// A valid review-stage payload
pub fn review_payload() -> serde_json::Map<String, serde_json::Value> {
    let mut fields = serde_json::Map::new();
    fields.insert(
        "research_question".to_string(),
        serde_json::json!("What is the effect of exercise on recovery time?"),
    );
    fields
}
