//! Error taxonomy shared across the engine.
//!
//! Every failure surfaced to callers carries one of the structured codes
//! below. Raw dependency errors never cross a module boundary; they are
//! normalized by the router dispatcher or the gateway first.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error codes exposed on the status API and event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Rejected at submission; never retried
    ValidationError,

    /// Network/timeout failure; retried at job level with backoff
    TransientError,

    /// Input flagged by the safety gate; fail closed, no network call made
    PhiBlocked,

    /// Breaker open for the endpoint; fast-fail, no call attempted
    CircuitOpen,

    /// Agent responded with success=false; handled per step policy
    AgentError,

    /// Unmapped task type or integrity violation; fails immediately
    Fatal,
}

impl ErrorCode {
    /// Only transient failures qualify for job-level retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientError)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::TransientError => "TRANSIENT_ERROR",
            Self::PhiBlocked => "PHI_BLOCKED",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::AgentError => "AGENT_ERROR",
            Self::Fatal => "FATAL",
        };
        f.write_str(s)
    }
}

/// Failures produced while dispatching a single step to an agent.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("input flagged by PHI gate ({span_count} span(s))")]
    PhiBlocked { span_count: usize },

    #[error("circuit open for endpoint '{endpoint}'")]
    CircuitOpen { endpoint: String },

    #[error("call to '{endpoint}' timed out after {timeout_secs}s")]
    Timeout { endpoint: String, timeout_secs: u64 },

    #[error("network error calling '{endpoint}': {message}")]
    Network { endpoint: String, message: String },

    #[error("agent '{task_type}' returned an error: {message}")]
    Agent { task_type: String, message: String },

    #[error("fatal: {0}")]
    Fatal(String),
}

impl DispatchError {
    /// Map this failure onto the public taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::PhiBlocked { .. } => ErrorCode::PhiBlocked,
            Self::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            Self::Timeout { .. } | Self::Network { .. } => ErrorCode::TransientError,
            Self::Agent { .. } => ErrorCode::AgentError,
            Self::Fatal(_) => ErrorCode::Fatal,
        }
    }
}
