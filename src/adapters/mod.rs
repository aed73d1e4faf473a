//! Clients for external services consumed by the engine.
//!
//! Agents are opaque request/response services behind a uniform
//! contract; the PHI gate is a synchronous text-scan service. Both are
//! traits so tests can inject counting mocks.

pub mod http;
pub mod phi;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpAgentClient;
pub use phi::{HttpPhiGate, PhiGate, ScanResult};

/// Request body for `POST {endpoint}/run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub task_type: String,
    pub inputs: serde_json::Value,
}

/// Response body from an agent run call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Transport-level failures, distinct from an agent saying success=false
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentCallError {
    #[error("network error: {0}")]
    Network(String),

    #[error("call timed out")]
    Timeout,
}

/// Uniform contract for invoking processing agents
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Invoke an agent at `address` with the step's task type and inputs.
    ///
    /// Transport failures surface as `AgentCallError`; an agent-level
    /// failure comes back as a response with `success=false`.
    async fn run(
        &self,
        address: &str,
        request: &AgentRequest,
    ) -> Result<AgentResponse, AgentCallError>;

    /// Probe `GET {endpoint}/health`
    async fn health_check(&self, address: &str) -> Result<()>;
}
