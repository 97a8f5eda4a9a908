//! Chain module - static chain/token description and external chain observers
//!
//! This module provides:
//! - Chain families and per-chain context (bridge token, indexing behaviour)
//! - The token registry loaded once at startup
//! - Cosmos LCD account/transaction indexer client with endpoint failover
//! - Bridge relay tracker for cross-chain message delivery

pub mod indexer;
pub mod registry;
pub mod relay;

pub use indexer::{AccountIndexer, LcdAccountIndexer};
pub use registry::{AssetRef, Token, TokenRegistry};
pub use relay::{AxelarscanTracker, BridgeTracker, RelayStatus};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Class of chains sharing an account/transaction model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Cosmos,
}

impl ChainFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Evm => "evm",
            ChainFamily::Cosmos => "cosmos",
        }
    }

    /// Accounts in this family only exist once they have been funded
    pub fn requires_activation(&self) -> bool {
        matches!(self, ChainFamily::Cosmos)
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chain identifier (`"361"` for Theta, `"stride-1"` etc. for Cosmos chains)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Static description of one supported chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainContext {
    pub id: ChainId,
    pub name: String,
    pub family: ChainFamily,
    /// Symbol of the token the bridge carries out of this chain, if any
    #[serde(default)]
    pub bridge_token: Option<String>,
    /// Transactions on this chain show up in the indexer only after a delay
    #[serde(default)]
    pub delayed_indexing: bool,
}

impl ChainContext {
    pub fn new(id: &str, name: &str, family: ChainFamily) -> Self {
        Self {
            id: ChainId::new(id),
            name: name.to_string(),
            family,
            bridge_token: None,
            delayed_indexing: false,
        }
    }

    pub fn with_bridge_token(mut self, symbol: &str) -> Self {
        self.bridge_token = Some(symbol.to_string());
        self
    }

    pub fn with_delayed_indexing(mut self) -> Self {
        self.delayed_indexing = true;
        self
    }
}

/// Bridge network name for a chain (Axelar naming)
pub fn bridge_chain_name(chain_id: &ChainId) -> &str {
    match chain_id.as_str() {
        "361" | "365" => "theta",
        "cosmoshub-4" => "cosmoshub",
        "osmosis-1" => "osmosis",
        "core-1" => "persistence",
        "stride-1" => "stride",
        other => other,
    }
}
