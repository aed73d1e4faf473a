//! Engine configuration.
//!
//! One YAML file declares the agent registry, the stage definitions
//! and the operating knobs. The file is loaded once at startup and
//! validated as a whole: every task type referenced by any stage must
//! resolve to a registered agent, otherwise startup fails.
//!
//! Sources (highest priority first):
//! 1. STAGEHAND_HOME environment variable (state directory)
//! 2. Values in the config file
//! 3. Defaults (~/.stagehand)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::breaker::BreakerConfig;
use crate::core::router::{AgentEndpoint, AgentRegistry};
use crate::core::stage::StageRegistry;
use crate::queue::RetryPolicy;

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// State directory for artifacts (default ~/.stagehand)
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// PHI gate service base address
    pub phi_gate: PhiGateConfig,

    /// Per-call agent timeout in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,

    /// How long finished jobs keep their event channel, in seconds
    #[serde(default = "default_event_retention")]
    pub event_retention_seconds: u64,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Registered processing agents
    pub agents: Vec<AgentEndpoint>,

    /// Stage definitions
    pub stages: Vec<crate::core::stage::StageDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhiGateConfig {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Concurrent jobs per process
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_call_timeout() -> u64 {
    30
}
fn default_event_retention() -> u64 {
    300
}
fn default_concurrency() -> usize {
    2
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("Failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation: stage definitions are well formed and every
    /// task type resolves to a registered agent.
    pub fn validate(&self) -> Result<()> {
        let stages = self.stage_registry();
        stages.validate()?;
        self.agent_registry().validate_stages(&stages)?;
        Ok(())
    }

    pub fn stage_registry(&self) -> StageRegistry {
        StageRegistry {
            stages: self.stages.clone(),
        }
    }

    pub fn agent_registry(&self) -> AgentRegistry {
        AgentRegistry::new(self.agents.clone())
    }

    /// Resolved state directory (STAGEHAND_HOME > config > ~/.stagehand)
    pub fn state_dir(&self) -> Result<PathBuf> {
        self.resolve_state_dir(std::env::var_os("STAGEHAND_HOME").map(PathBuf::from))
    }

    fn resolve_state_dir(&self, env_home: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(dir) = env_home {
            return Ok(dir);
        }
        if let Some(ref dir) = self.state_dir {
            return Ok(dir.clone());
        }
        Ok(dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".stagehand"))
    }

    /// Artifact directory under the state directory
    pub fn artifacts_dir(&self) -> Result<PathBuf> {
        Ok(self.state_dir()?.join("artifacts"))
    }
}
