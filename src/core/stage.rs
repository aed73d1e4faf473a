//! Stage definitions and loading.
//!
//! Stages are defined in YAML and consist of a fixed ordered step list,
//! each targeting one agent task type. Failure handling is declared per
//! step in a policy table rather than branched inline: LIVE mode treats
//! every step as strict, DEMO mode consults the step's declared policy.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Governance mode controlling whether step failures are tolerated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Best-effort steps may fail without aborting the job
    Demo,

    /// Every step is strict; any failure aborts the job
    Live,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Live
    }
}

/// How a step failure is handled under DEMO mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Failure aborts the job, remaining steps are skipped
    Strict,

    /// Failure logs a warning and the pipeline continues
    BestEffort,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Strict
    }
}

/// A complete stage definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Stage number within the workflow
    pub stage: u32,

    /// Human-readable name
    pub name: String,

    /// Request fields this stage expects at submission
    #[serde(default)]
    pub inputs: Vec<InputField>,

    /// Ordered list of steps to execute
    pub steps: Vec<StepDefinition>,
}

impl StageDefinition {
    /// Resolve the effective failure policy for a step under a mode.
    ///
    /// LIVE is strict for every step regardless of declaration.
    pub fn policy(&self, step: &StepDefinition, mode: Mode) -> FailurePolicy {
        match mode {
            Mode::Live => FailurePolicy::Strict,
            Mode::Demo => step.demo_policy,
        }
    }

    /// Step names in execution order
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }

    /// Validate the stage definition itself
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Stage {} has an empty name", self.stage);
        }

        if self.steps.is_empty() {
            anyhow::bail!("Stage {} must have at least one step", self.stage);
        }

        let mut seen = std::collections::HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if step.name.is_empty() {
                anyhow::bail!("Stage {} step {} has an empty name", self.stage, i);
            }
            if !seen.insert(step.name.as_str()) {
                anyhow::bail!(
                    "Stage {} has duplicate step name '{}'",
                    self.stage,
                    step.name
                );
            }
        }

        Ok(())
    }
}

/// A single step in a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name (unique within the stage)
    pub name: String,

    /// Agent task type this step dispatches to
    pub task_type: String,

    /// Failure policy under DEMO mode (LIVE is always strict)
    #[serde(default)]
    pub demo_policy: FailurePolicy,
}

/// A request field the gateway validates at submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputField {
    /// Field name in the request payload
    pub name: String,

    /// Whether the field must be present
    #[serde(default = "default_required")]
    pub required: bool,

    /// Minimum length for text fields
    #[serde(default)]
    pub min_length: Option<usize>,
}

fn default_required() -> bool {
    true
}

/// All stages known to the engine, resolved once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRegistry {
    pub stages: Vec<StageDefinition>,
}

impl StageRegistry {
    /// Load stage definitions from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stages file: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse stage definitions from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let registry: Self =
            serde_yaml::from_str(content).context("Failed to parse stages YAML")?;
        registry.validate()?;
        Ok(registry)
    }

    /// Validate every stage definition
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.stage) {
                anyhow::bail!("Duplicate stage number {}", stage.stage);
            }
            stage.validate()?;
        }
        Ok(())
    }

    /// Look up a stage by number
    pub fn get(&self, stage: u32) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Every distinct task type referenced by any step
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self
            .stages
            .iter()
            .flat_map(|s| s.steps.iter().map(|step| step.task_type.as_str()))
            .collect();
        types.sort_unstable();
        types.dedup();
        types
    }
}
