//! HTTP agent client.
//!
//! Speaks the agent contract over reqwest:
//! `POST {endpoint}/run` with `{task_type, inputs}`, `GET {endpoint}/health`.
//! The per-call timeout lives in the router dispatcher, not here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{AgentCallError, AgentClient, AgentRequest, AgentResponse};

/// Reqwest-backed agent client shared by all endpoints
pub struct HttpAgentClient {
    client: reqwest::Client,
}

impl Default for HttpAgentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpAgentClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn run(
        &self,
        address: &str,
        request: &AgentRequest,
    ) -> Result<AgentResponse, AgentCallError> {
        let url = format!("{}/run", address.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentCallError::Timeout
                } else {
                    AgentCallError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentCallError::Network(format!(
                "agent returned HTTP {}",
                status
            )));
        }

        response
            .json::<AgentResponse>()
            .await
            .map_err(|e| AgentCallError::Network(format!("invalid agent response: {}", e)))
    }

    async fn health_check(&self, address: &str) -> Result<()> {
        let url = format!("{}/health", address.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Health check request to {} failed", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Health check at {} returned HTTP {}", url, response.status());
        }

        let body: HealthResponse = response
            .json()
            .await
            .context("Health check returned an invalid body")?;

        if body.status != "ok" {
            anyhow::bail!("Agent at {} reported status '{}'", url, body.status);
        }

        Ok(())
    }
}
