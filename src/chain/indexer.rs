//! Cosmos LCD indexer client with multi-endpoint failover

use super::ChainId;
use crate::config::IndexerConfig;
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Read-only view of a chain's account and transaction index
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountIndexer: Send + Sync {
    /// Whether the account has been created on-chain
    async fn account_exists(&self, chain_id: &ChainId, address: &str) -> OrchestratorResult<bool>;

    /// Whether a transaction is visible in the chain's index
    async fn is_indexed(&self, chain_id: &ChainId, tx_ref: &str) -> OrchestratorResult<bool>;
}

/// LCD endpoints for one chain
struct LcdEndpoints {
    urls: Vec<String>,
    current: AtomicUsize,
}

impl LcdEndpoints {
    fn active(&self) -> &str {
        let idx = self.current.load(Ordering::Relaxed);
        &self.urls[idx % self.urls.len()]
    }

    fn failover(&self, chain_id: &ChainId) {
        let next = (self.current.load(Ordering::Relaxed) + 1) % self.urls.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("Chain {} LCD failover to endpoint {}", chain_id, next);
    }
}

/// Indexer backed by Cosmos SDK LCD (REST) endpoints
pub struct LcdAccountIndexer {
    client: reqwest::Client,
    chains: HashMap<ChainId, LcdEndpoints>,
}

impl LcdAccountIndexer {
    pub fn new(config: &IndexerConfig) -> OrchestratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| OrchestratorError::Config(e.to_string()))?;

        let chains = config
            .lcd
            .iter()
            .filter(|(_, urls)| !urls.is_empty())
            .map(|(chain_id, urls)| {
                let urls = urls.iter().map(|u| u.trim_end_matches('/').to_string()).collect();
                (
                    ChainId::new(chain_id.as_str()),
                    LcdEndpoints {
                        urls,
                        current: AtomicUsize::new(0),
                    },
                )
            })
            .collect();

        Ok(Self { client, chains })
    }

    /// GET `path` against the chain's endpoints, returning whether the
    /// resource exists. A 404 means "not yet"; any other failure rotates to
    /// the next endpoint.
    async fn lookup(&self, chain_id: &ChainId, path: &str) -> OrchestratorResult<bool> {
        let endpoints = self
            .chains
            .get(chain_id)
            .ok_or_else(|| OrchestratorError::ChainNotFound(chain_id.to_string()))?;

        for _ in 0..endpoints.urls.len() {
            let url = format!("{}{}", endpoints.active(), path);
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(true),
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                    debug!("{} not found on {}", path, chain_id);
                    return Ok(false);
                }
                Ok(resp) => {
                    warn!("LCD {} returned {} for {}", url, resp.status(), chain_id);
                    endpoints.failover(chain_id);
                }
                Err(e) => {
                    warn!("LCD request to {} failed: {}", url, e);
                    endpoints.failover(chain_id);
                }
            }
        }

        Err(OrchestratorError::Indexer {
            chain_id: chain_id.to_string(),
            message: "All LCD endpoints failed".to_string(),
        })
    }
}

#[async_trait]
impl AccountIndexer for LcdAccountIndexer {
    async fn account_exists(&self, chain_id: &ChainId, address: &str) -> OrchestratorResult<bool> {
        self.lookup(chain_id, &format!("/cosmos/auth/v1beta1/accounts/{}", address))
            .await
    }

    async fn is_indexed(&self, chain_id: &ChainId, tx_ref: &str) -> OrchestratorResult<bool> {
        let hash = tx_ref.trim_start_matches("0x").to_uppercase();
        self.lookup(chain_id, &format!("/cosmos/tx/v1beta1/txs/{}", hash))
            .await
    }
}
