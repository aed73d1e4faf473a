//! Command-line interface for stagehand.
//!
//! Provides commands for executing a stage in-process, validating the
//! configuration, probing agent health, and inspecting artifacts.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::adapters::{AgentClient, HttpAgentClient, HttpPhiGate, PhiGate};
use crate::config::EngineConfig;
use crate::core::stage::Mode;
use crate::core::{
    BreakerRegistry, FsArtifactStore, Orchestrator, ProgressBroadcaster, RouterDispatcher,
};
use crate::gateway::{Gateway, SubmitRequest};
use crate::queue::{JobQueue, JobStore, WorkerPool};

/// stagehand - stage dispatch and orchestration engine
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the engine configuration file
    #[arg(short, long, env = "STAGEHAND_CONFIG", default_value = "stagehand.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a stage execution and drive it to completion in-process
    Run {
        /// Stage number to execute
        stage: u32,

        /// Workflow id the job belongs to
        #[arg(short, long)]
        workflow_id: String,

        /// JSON payload file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Governance mode
        #[arg(short, long, value_enum, default_value = "live")]
        mode: ModeArg,
    },

    /// Validate the configuration: stage definitions and agent routing
    Validate,

    /// Probe the health endpoint of every registered agent
    Doctor,

    /// List persisted artifacts for a workflow stage
    Artifacts {
        /// Workflow id
        workflow_id: String,

        /// Stage number
        stage: u32,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Governance mode for CLI (maps to Mode)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// Best-effort steps may fail without aborting
    Demo,

    /// Every step failure aborts the job
    Live,
}

impl From<ModeArg> for Mode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Demo => Mode::Demo,
            ModeArg::Live => Mode::Live,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = EngineConfig::from_file(&self.config)?;

        match self.command {
            Commands::Run {
                stage,
                workflow_id,
                input,
                mode,
            } => run_stage(&config, stage, workflow_id, input, mode.into()).await,
            Commands::Validate => validate(&config),
            Commands::Doctor => doctor(&config).await,
            Commands::Artifacts { workflow_id, stage } => {
                list_artifacts(&config, &workflow_id, stage).await
            }
            Commands::Config => show_config(&config),
        }
    }
}

/// The wired-up engine for one process
struct Engine {
    gateway: Arc<Gateway>,
    pool: Arc<WorkerPool>,
}

fn build_engine(config: &EngineConfig) -> Result<Engine> {
    let stages = Arc::new(config.stage_registry());
    let registry = config.agent_registry();
    registry.validate_stages(&stages)?;

    let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
    let gate: Arc<dyn PhiGate> = Arc::new(HttpPhiGate::new(&config.phi_gate.endpoint));
    let client: Arc<dyn AgentClient> = Arc::new(HttpAgentClient::new());

    let dispatcher = Arc::new(RouterDispatcher::new(
        registry,
        breakers,
        gate,
        client,
        Duration::from_secs(config.call_timeout_seconds),
    ));

    let artifacts = Arc::new(FsArtifactStore::new(config.artifacts_dir()?));
    let broadcaster = Arc::new(ProgressBroadcaster::new(Duration::from_secs(
        config.event_retention_seconds,
    )));
    let store = Arc::new(JobStore::new());
    let queue = Arc::new(JobQueue::new());

    let orchestrator = Arc::new(Orchestrator::new(
        dispatcher,
        artifacts,
        Arc::clone(&broadcaster),
        Arc::clone(&store),
    ));

    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&queue),
        Arc::clone(&store),
        Arc::clone(&stages),
        orchestrator,
        Arc::clone(&broadcaster),
        config.worker.retry.clone(),
        config.worker.concurrency,
    ));

    let gateway = Arc::new(Gateway::new(stages, store, queue, broadcaster));

    Ok(Engine { gateway, pool })
}

async fn run_stage(
    config: &EngineConfig,
    stage: u32,
    workflow_id: String,
    input: Option<PathBuf>,
    mode: Mode,
) -> Result<()> {
    let payload = read_payload(input)?;
    let engine = build_engine(config)?;

    let response = engine
        .gateway
        .submit(
            stage,
            SubmitRequest {
                workflow_id,
                mode,
                fields: payload,
            },
        )
        .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;

    println!("Job {} queued", response.job_id);

    engine.pool.drain().await;

    // Replay the full event log now that the job is terminal
    let subscription = engine
        .gateway
        .subscribe(response.job_id)
        .context("Job event channel missing")?;
    for event in &subscription.history {
        println!("{}", serde_json::to_string(&event)?);
    }

    let status = engine
        .gateway
        .status(response.job_id)
        .context("Job row missing after execution")?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    Ok(())
}

fn validate(config: &EngineConfig) -> Result<()> {
    // Parsing already validated stage/agent consistency
    println!(
        "ok: {} stage(s), {} agent(s), all task types resolved",
        config.stages.len(),
        config.agents.len()
    );
    Ok(())
}

async fn doctor(config: &EngineConfig) -> Result<()> {
    let client = HttpAgentClient::new();
    let mut failures = 0usize;

    for endpoint in config.agent_registry().endpoints() {
        match client.health_check(&endpoint.address).await {
            Ok(()) => println!("ok      {} ({})", endpoint.task_type, endpoint.address),
            Err(e) => {
                failures += 1;
                println!("FAILED  {} ({}): {}", endpoint.task_type, endpoint.address, e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} agent(s) unhealthy", failures);
    }
    Ok(())
}

async fn list_artifacts(config: &EngineConfig, workflow_id: &str, stage: u32) -> Result<()> {
    let store = FsArtifactStore::new(config.artifacts_dir()?);
    let steps = store.list_steps(workflow_id, stage).await?;

    if steps.is_empty() {
        println!("No artifacts for {} stage {}", workflow_id, stage);
        return Ok(());
    }

    for step in steps {
        println!("{}/stage-{}/{}", workflow_id, stage, step);
    }
    Ok(())
}

fn show_config(config: &EngineConfig) -> Result<()> {
    println!("state dir:      {}", config.state_dir()?.display());
    println!("artifacts dir:  {}", config.artifacts_dir()?.display());
    println!("phi gate:       {}", config.phi_gate.endpoint);
    println!("call timeout:   {}s", config.call_timeout_seconds);
    println!("concurrency:    {}", config.worker.concurrency);
    println!("stages:         {}", config.stages.len());
    println!("agents:         {}", config.agents.len());
    Ok(())
}

fn read_payload(input: Option<PathBuf>) -> Result<serde_json::Map<String, serde_json::Value>> {
    let content = match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read payload file: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read payload from stdin")?;
            buffer
        }
    };

    let value: serde_json::Value =
        serde_json::from_str(&content).context("Payload is not valid JSON")?;

    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => anyhow::bail!("Payload must be a JSON object"),
    }
}
