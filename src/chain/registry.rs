//! Token registry for supported Theta and Cosmos assets

use super::{ChainContext, ChainFamily, ChainId};
use crate::error::{OrchestratorError, OrchestratorResult};

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// On-chain reference for a token that is not the chain's native coin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRef {
    /// ERC20 contract on an EVM chain
    Contract(Address),
    /// Bank denom on a Cosmos chain
    Denom(String),
}

/// A supported token. Immutable once the registry is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub family: ChainFamily,
    pub chain_id: ChainId,
    #[serde(default)]
    pub asset: Option<AssetRef>,
    #[serde(default)]
    pub liquid_staking: bool,
    /// Underlying asset symbol for liquid-staking derivatives
    #[serde(default)]
    pub underlying: Option<String>,
}

impl Token {
    fn native(symbol: &str, name: &str, decimals: u8, family: ChainFamily, chain_id: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            decimals,
            family,
            chain_id: ChainId::new(chain_id),
            asset: None,
            liquid_staking: false,
            underlying: None,
        }
    }

    fn cosmos(symbol: &str, name: &str, chain_id: &str, denom: &str) -> Self {
        Self {
            asset: Some(AssetRef::Denom(denom.to_string())),
            ..Self::native(symbol, name, 6, ChainFamily::Cosmos, chain_id)
        }
    }

    fn lst(symbol: &str, name: &str, chain_id: &str, denom: &str, underlying: &str) -> Self {
        Self {
            liquid_staking: true,
            underlying: Some(underlying.to_string()),
            ..Self::cosmos(symbol, name, chain_id, denom)
        }
    }

    pub fn is_liquid_staking(&self) -> bool {
        self.liquid_staking
    }
}

/// Registry of supported chains and tokens
#[derive(Debug, Clone)]
pub struct TokenRegistry {
    chains: HashMap<ChainId, ChainContext>,
    tokens: Vec<Token>,
}

impl TokenRegistry {
    /// Build a registry, validating that every token points at a known chain
    /// of the same family
    pub fn from_parts(chains: Vec<ChainContext>, tokens: Vec<Token>) -> OrchestratorResult<Self> {
        let chains: HashMap<ChainId, ChainContext> =
            chains.into_iter().map(|c| (c.id.clone(), c)).collect();

        for (i, token) in tokens.iter().enumerate() {
            let chain = chains
                .get(&token.chain_id)
                .ok_or_else(|| OrchestratorError::ChainNotFound(token.chain_id.to_string()))?;
            if chain.family != token.family {
                return Err(OrchestratorError::Config(format!(
                    "Token {} declares family {} but chain {} is {}",
                    token.symbol, token.family, chain.id, chain.family
                )));
            }
            if tokens[..i].iter().any(|t| t.symbol == token.symbol) {
                return Err(OrchestratorError::Config(format!(
                    "Duplicate token symbol {}",
                    token.symbol
                )));
            }
            if token.liquid_staking && token.underlying.is_none() {
                return Err(OrchestratorError::Config(format!(
                    "Liquid-staking token {} has no underlying asset",
                    token.symbol
                )));
            }
        }

        for chain in chains.values() {
            if let Some(bridge_token) = &chain.bridge_token {
                if !tokens
                    .iter()
                    .any(|t| &t.symbol == bridge_token && t.chain_id == chain.id)
                {
                    return Err(OrchestratorError::Config(format!(
                        "Bridge token {} is not registered on chain {}",
                        bridge_token, chain.id
                    )));
                }
            }
        }

        debug!(
            "Token registry built with {} chains and {} tokens",
            chains.len(),
            tokens.len()
        );

        Ok(Self { chains, tokens })
    }

    /// Built-in Theta mainnet and Cosmos liquid-staking table
    pub fn builtin() -> Self {
        let chains = vec![
            ChainContext::new("361", "Theta Mainnet", ChainFamily::Evm).with_bridge_token("USDC"),
            ChainContext::new("stride-1", "Stride", ChainFamily::Cosmos).with_delayed_indexing(),
            ChainContext::new("core-1", "Persistence", ChainFamily::Cosmos).with_delayed_indexing(),
            ChainContext::new("cosmoshub-4", "Cosmos Hub", ChainFamily::Cosmos),
            ChainContext::new("celestia", "Celestia", ChainFamily::Cosmos),
            ChainContext::new("osmosis-1", "Osmosis", ChainFamily::Cosmos),
        ];

        let tokens = vec![
            Token::native("TFUEL", "Theta Fuel", 18, ChainFamily::Evm, "361"),
            Token::native("USDC", "USD Coin", 6, ChainFamily::Evm, "361"),
            Token::lst("stkATOM", "Staked ATOM", "stride-1", "stuatom", "ATOM"),
            Token::lst("stkTIA", "Staked TIA", "stride-1", "stutia", "TIA"),
            Token::lst("stkOSMO", "Staked OSMO", "stride-1", "stuosmo", "OSMO"),
            Token::lst("stkXPRT", "Staked XPRT", "core-1", "stk/uxprt", "XPRT"),
            Token::cosmos("ATOM", "Cosmos Hub", "cosmoshub-4", "uatom"),
            Token::cosmos("TIA", "Celestia", "celestia", "utia"),
            Token::cosmos("OSMO", "Osmosis", "osmosis-1", "uosmo"),
            Token::cosmos("XPRT", "Persistence", "core-1", "uxprt"),
        ];

        // The built-in table is consistent by construction
        let chains: HashMap<ChainId, ChainContext> =
            chains.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self { chains, tokens }
    }

    /// Look up a token by symbol
    pub fn token(&self, symbol: &str) -> OrchestratorResult<&Token> {
        self.tokens
            .iter()
            .find(|t| t.symbol == symbol)
            .ok_or_else(|| OrchestratorError::UnknownToken(symbol.to_string()))
    }

    /// Look up a chain by identifier
    pub fn chain(&self, chain_id: &ChainId) -> OrchestratorResult<&ChainContext> {
        self.chains
            .get(chain_id)
            .ok_or_else(|| OrchestratorError::ChainNotFound(chain_id.to_string()))
    }

    /// Chain context for the chain a token lives on
    pub fn chain_of(&self, token: &Token) -> OrchestratorResult<&ChainContext> {
        self.chain(&token.chain_id)
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn tokens_for_family(&self, family: ChainFamily) -> Vec<&Token> {
        self.tokens.iter().filter(|t| t.family == family).collect()
    }

    /// Only cross-family moves are routable
    pub fn is_valid_pair(source: &Token, destination: &Token) -> bool {
        source.family != destination.family
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
