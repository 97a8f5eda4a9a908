//! Bridge relay tracking
//!
//! A bridge transfer is complete once the relay network has executed the
//! cross-chain message on the destination chain.

use crate::config::BridgeConfig;
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Relay progress of a bridge message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayStatus {
    /// Source transaction seen, not yet confirmed by the relay network
    Pending,
    /// Confirmed or approved, awaiting execution on the destination
    Confirmed,
    /// Delivered to the destination chain
    Executed,
    /// Relay gave up on the message
    Failed { reason: String },
}

impl RelayStatus {
    pub fn is_delivered(&self) -> bool {
        matches!(self, RelayStatus::Executed)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeTracker: Send + Sync {
    async fn relay_status(&self, tx_ref: &str) -> OrchestratorResult<RelayStatus>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    tx_hash: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<MessageRecord>,
}

#[derive(Debug, Deserialize)]
struct MessageRecord {
    status: String,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Axelarscan GMP search client
pub struct AxelarscanTracker {
    base_url: String,
    client: reqwest::Client,
}

impl AxelarscanTracker {
    pub fn new(config: &BridgeConfig) -> OrchestratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| OrchestratorError::Config(e.to_string()))?;

        Ok(Self {
            base_url: config.tracker_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn map_status(record: &MessageRecord) -> RelayStatus {
        match record.status.as_str() {
            "executed" => RelayStatus::Executed,
            "confirmed" | "approved" | "executing" => RelayStatus::Confirmed,
            "error" | "insufficient_fee" => RelayStatus::Failed {
                reason: record
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| record.status.clone()),
            },
            _ => RelayStatus::Pending,
        }
    }
}

#[async_trait]
impl BridgeTracker for AxelarscanTracker {
    async fn relay_status(&self, tx_ref: &str) -> OrchestratorResult<RelayStatus> {
        let url = format!("{}/gmp/searchGMP", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&SearchRequest { tx_hash: tx_ref })
            .send()
            .await
            .map_err(|e| OrchestratorError::Relay(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(OrchestratorError::Relay(format!(
                "Tracker returned {}",
                resp.status()
            )));
        }

        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| OrchestratorError::Relay(e.to_string()))?;

        // Not yet picked up by the relay network
        let status = body
            .data
            .first()
            .map(Self::map_status)
            .unwrap_or(RelayStatus::Pending);

        debug!("Relay status for {}: {:?}", tx_ref, status);
        Ok(status)
    }
}
