//! PHI safety gate client.
//!
//! The gate scans free text before it may leave the process boundary.
//! Dispatch fails closed: a flagged scan means no agent call is made.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of scanning one piece of text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Whether the text contains protected information
    pub flagged: bool,

    /// Character ranges that triggered the flag
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<ScanSpan>,
}

impl ScanResult {
    pub fn clean() -> Self {
        Self {
            flagged: false,
            spans: Vec::new(),
        }
    }
}

/// One flagged character range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSpan {
    pub start: usize,
    pub end: usize,
}

/// Synchronous text-scan service contract
#[async_trait]
pub trait PhiGate: Send + Sync {
    async fn scan(&self, text: &str) -> Result<ScanResult>;
}

/// HTTP client for a remote PHI scanning service
pub struct HttpPhiGate {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpPhiGate {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ScanRequest<'a> {
    text: &'a str,
}

#[async_trait]
impl PhiGate for HttpPhiGate {
    async fn scan(&self, text: &str) -> Result<ScanResult> {
        let url = format!("{}/scan", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&ScanRequest { text })
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("PHI gate returned HTTP {}", response.status());
        }

        Ok(response.json::<ScanResult>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_result_parsing() {
        let json = r#"{"flagged": true, "spans": [{"start": 4, "end": 15}]}"#;
        let result: ScanResult = serde_json::from_str(json).unwrap();

        assert!(result.flagged);
        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.spans[0].start, 4);
    }

    #[test]
    fn test_clean_result() {
        let result = ScanResult::clean();
        assert!(!result.flagged);
        assert!(result.spans.is_empty());
    }
}
