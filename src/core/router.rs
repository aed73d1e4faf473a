//! Task-type routing and step dispatch.
//!
//! The agent registry is a closed table resolved once at startup; a
//! step referencing an unmapped task type fails startup validation
//! rather than surfacing mid-job. Dispatch order for every step:
//! PHI gate scan, breaker admission, agent call with timeout, error
//! normalization into the public taxonomy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::adapters::{AgentCallError, AgentClient, AgentRequest, PhiGate};
use crate::error::DispatchError;

use super::breaker::BreakerRegistry;
use super::stage::StageRegistry;

/// One registered processing agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEndpoint {
    /// Task type this agent serves
    pub task_type: String,

    /// Network address, e.g. "http://extraction-agent:8080"
    pub address: String,
}

/// Closed task-type -> endpoint table
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    endpoints: HashMap<String, AgentEndpoint>,
}

impl AgentRegistry {
    pub fn new(endpoints: Vec<AgentEndpoint>) -> Self {
        let endpoints = endpoints
            .into_iter()
            .map(|e| (e.task_type.clone(), e))
            .collect();
        Self { endpoints }
    }

    /// Look up the endpoint for a task type
    pub fn resolve(&self, task_type: &str) -> Option<&AgentEndpoint> {
        self.endpoints.get(task_type)
    }

    /// All registered endpoints
    pub fn endpoints(&self) -> impl Iterator<Item = &AgentEndpoint> {
        self.endpoints.values()
    }

    /// Verify that every task type referenced by any stage resolves.
    ///
    /// Called once at startup; an unmapped task type here is fatal.
    pub fn validate_stages(&self, stages: &StageRegistry) -> Result<()> {
        let unmapped: Vec<&str> = stages
            .task_types()
            .into_iter()
            .filter(|t| !self.endpoints.contains_key(*t))
            .collect();

        if !unmapped.is_empty() {
            anyhow::bail!(
                "FATAL: task type(s) with no registered agent: {}",
                unmapped.join(", ")
            );
        }

        Ok(())
    }
}

/// Routes step calls to agents through the gate and breakers
pub struct RouterDispatcher {
    registry: AgentRegistry,
    breakers: Arc<BreakerRegistry>,
    gate: Arc<dyn PhiGate>,
    client: Arc<dyn AgentClient>,
    call_timeout: Duration,
}

impl RouterDispatcher {
    pub fn new(
        registry: AgentRegistry,
        breakers: Arc<BreakerRegistry>,
        gate: Arc<dyn PhiGate>,
        client: Arc<dyn AgentClient>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            breakers,
            gate,
            client,
            call_timeout,
        }
    }

    /// Dispatch one step's inputs to the agent for its task type.
    ///
    /// The PHI gate scans every free-text input field first; a flagged
    /// scan returns `PhiBlocked` with zero network calls made.
    #[instrument(skip(self, inputs), fields(task_type))]
    pub async fn dispatch(
        &self,
        task_type: &str,
        inputs: &serde_json::Value,
    ) -> Result<serde_json::Value, DispatchError> {
        let endpoint = self.registry.resolve(task_type).ok_or_else(|| {
            // Startup validation makes this unreachable for configured
            // stages; an integrity violation if it fires.
            DispatchError::Fatal(format!("no agent registered for task type '{}'", task_type))
        })?;

        self.scan_inputs(inputs).await?;

        if !self.breakers.try_acquire(&endpoint.address) {
            return Err(DispatchError::CircuitOpen {
                endpoint: endpoint.address.clone(),
            });
        }

        let request = AgentRequest {
            task_type: task_type.to_string(),
            inputs: inputs.clone(),
        };

        let call = self.client.run(&endpoint.address, &request);
        let outcome = tokio::time::timeout(self.call_timeout, call).await;

        match outcome {
            Err(_elapsed) => {
                self.breakers.record_failure(&endpoint.address);
                Err(DispatchError::Timeout {
                    endpoint: endpoint.address.clone(),
                    timeout_secs: self.call_timeout.as_secs(),
                })
            }
            Ok(Err(AgentCallError::Timeout)) => {
                self.breakers.record_failure(&endpoint.address);
                Err(DispatchError::Timeout {
                    endpoint: endpoint.address.clone(),
                    timeout_secs: self.call_timeout.as_secs(),
                })
            }
            Ok(Err(AgentCallError::Network(message))) => {
                self.breakers.record_failure(&endpoint.address);
                Err(DispatchError::Network {
                    endpoint: endpoint.address.clone(),
                    message,
                })
            }
            Ok(Ok(response)) => {
                // Transport succeeded; the breaker guards endpoint health,
                // not agent-level outcomes.
                self.breakers.record_success(&endpoint.address);

                if response.success {
                    debug!(task_type, "Agent call succeeded");
                    Ok(response.output.unwrap_or(serde_json::Value::Null))
                } else {
                    let message = response
                        .error
                        .unwrap_or_else(|| "agent reported failure without detail".to_string());
                    Err(DispatchError::Agent {
                        task_type: task_type.to_string(),
                        message,
                    })
                }
            }
        }
    }

    /// Scan every free-text field in the inputs; fail closed on a flag.
    async fn scan_inputs(&self, inputs: &serde_json::Value) -> Result<(), DispatchError> {
        let mut span_count = 0usize;

        for text in collect_free_text(inputs) {
            let result = self.gate.scan(text).await.map_err(|e| {
                // Gate unreachable: fail closed but allow a retry
                warn!(error = %e, "PHI gate scan failed");
                DispatchError::Network {
                    endpoint: "phi-gate".to_string(),
                    message: e.to_string(),
                }
            })?;

            if result.flagged {
                span_count += result.spans.len().max(1);
            }
        }

        if span_count > 0 {
            return Err(DispatchError::PhiBlocked { span_count });
        }

        Ok(())
    }
}

/// Collect every string value in a JSON payload, depth first
fn collect_free_text(value: &serde_json::Value) -> Vec<&str> {
    let mut texts = Vec::new();
    collect_into(value, &mut texts);
    texts
}

fn collect_into<'a>(value: &'a serde_json::Value, out: &mut Vec<&'a str>) {
    match value {
        serde_json::Value::String(s) => out.push(s.as_str()),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_into(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_into(item, out);
            }
        }
        _ => {}
    }
}
