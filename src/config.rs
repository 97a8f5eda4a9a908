//! Configuration management for the swap orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Every section has defaults, so a file only needs to name what it changes.

use crate::chain::{ChainContext, Token, TokenRegistry};
use crate::poller::PollConfig;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub sessions: SessionConfig,
    pub bridge: BridgeConfig,
    pub indexers: IndexerConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    /// Replaces the built-in chain/token table when present
    pub registry: Option<RegistryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Per-swap ceiling in source units; unset disables the check
    pub max_swap_amount: Option<Decimal>,
    /// Cumulative ceiling per signing account over completed runs
    pub max_user_total: Option<Decimal>,
    pub fallback_gas: Decimal,
    pub fallback_bridge_fee: Decimal,
    pub fees: FeeConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_swap_amount: Some(Decimal::new(1000, 0)),
            max_user_total: Some(Decimal::new(5000, 0)),
            fallback_gas: Decimal::new(1, 1),
            fallback_bridge_fee: Decimal::new(200, 2),
            fees: FeeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub local_swap_gas: Decimal,
    pub bridge_gas: Decimal,
    pub bridge_fee: Decimal,
    pub stake_gas: Decimal,
    pub unstake_gas: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            local_swap_gas: Decimal::new(1, 2),
            bridge_gas: Decimal::new(5, 2),
            bridge_fee: Decimal::new(15, 1),
            stake_gas: Decimal::new(5, 3),
            unstake_gas: Decimal::new(5, 3),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub relay_poll_interval_ms: u64,
    pub relay_poll_attempts: u32,
    pub activation_poll_interval_ms: u64,
    pub activation_poll_attempts: u32,
    pub activation_eta_floor_secs: u64,
    pub indexing_poll_interval_ms: u64,
    pub indexing_poll_attempts: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            relay_poll_interval_ms: 10_000,
            relay_poll_attempts: 90,
            activation_poll_interval_ms: 5_000,
            activation_poll_attempts: 60,
            activation_eta_floor_secs: 10,
            indexing_poll_interval_ms: 3_000,
            indexing_poll_attempts: 40,
        }
    }
}

impl ExecutorConfig {
    pub fn relay_poll(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_millis(self.relay_poll_interval_ms),
            self.relay_poll_attempts,
        )
    }

    pub fn activation_poll(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_millis(self.activation_poll_interval_ms),
            self.activation_poll_attempts,
        )
        .with_eta_floor(Duration::from_secs(self.activation_eta_floor_secs))
    }

    pub fn indexing_poll(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_millis(self.indexing_poll_interval_ms),
            self.indexing_poll_attempts,
        )
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    File,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Consecutive protocol failures before stored artifacts are purged
    pub failure_threshold: u32,
    pub pairing_poll_interval_ms: u64,
    pub pairing_poll_attempts: u32,
    pub store: StoreBackend,
    pub store_dir: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            pairing_poll_interval_ms: 1_000,
            pairing_poll_attempts: 120,
            store: StoreBackend::File,
            store_dir: "data/sessions".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn pairing_poll(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_millis(self.pairing_poll_interval_ms),
            self.pairing_poll_attempts,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// GMP tracker base URL
    pub tracker_url: String,
    pub request_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tracker_url: "https://api.axelarscan.io".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// LCD REST endpoints per chain id, tried in order with failover
    pub lcd: HashMap<String, Vec<String>>,
    pub request_timeout_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            lcd: HashMap::new(),
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub chains: Vec<ChainContext>,
    pub tokens: Vec<Token>,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("ORCHESTRATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse and validate a configuration document
    pub fn from_toml(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.sessions.failure_threshold == 0 {
            anyhow::bail!("sessions.failure_threshold must be at least 1");
        }

        let polls = [
            ("executor.relay_poll", self.executor.relay_poll()),
            ("executor.activation_poll", self.executor.activation_poll()),
            ("executor.indexing_poll", self.executor.indexing_poll()),
            ("sessions.pairing_poll", self.sessions.pairing_poll()),
        ];
        for (name, poll) in polls {
            if poll.interval.is_zero() || poll.max_attempts == 0 {
                anyhow::bail!("{} needs a positive interval and attempt count", name);
            }
        }

        if let Some(limit) = self.planner.max_swap_amount {
            if limit <= Decimal::ZERO {
                anyhow::bail!("planner.max_swap_amount must be positive");
            }
        }
        if let Some(total) = self.planner.max_user_total {
            if total <= Decimal::ZERO {
                anyhow::bail!("planner.max_user_total must be positive");
            }
            if let Some(per_swap) = self.planner.max_swap_amount {
                if per_swap > total {
                    anyhow::bail!("planner.max_swap_amount exceeds planner.max_user_total");
                }
            }
        }

        if self.bridge.tracker_url.is_empty() {
            anyhow::bail!("bridge.tracker_url is required");
        }

        let registry = self.token_registry()?;
        for chain_id in self.indexers.lcd.keys() {
            if registry.chain(&chain_id.as_str().into()).is_err() {
                tracing::warn!("LCD endpoints configured for unknown chain {}", chain_id);
            }
        }

        Ok(())
    }

    /// Build the token registry, from the override table when configured
    pub fn token_registry(&self) -> Result<TokenRegistry> {
        match &self.registry {
            Some(registry) => {
                TokenRegistry::from_parts(registry.chains.clone(), registry.tokens.clone())
                    .with_context(|| "Invalid registry override")
            }
            None => Ok(TokenRegistry::builtin()),
        }
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_env_var_substitution() {
        env::set_var("ORCH_TEST_TRACKER", "tracker.example.com");
        let input = "url = \"https://${ORCH_TEST_TRACKER}/gmp\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://tracker.example.com/gmp\"");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings = Settings::from_toml(
            r#"
            [planner]
            max_swap_amount = "250"

            [indexers.lcd]
            "stride-1" = ["https://stride-api.polkachu.com"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.planner.max_swap_amount, Some(Decimal::new(250, 0)));
        assert_eq!(settings.planner.max_user_total, Some(Decimal::new(5000, 0)));
        assert_eq!(settings.sessions.failure_threshold, 3);
        assert_eq!(
            settings.executor.activation_poll().eta_floor,
            Duration::from_secs(10)
        );
        assert_eq!(settings.indexers.lcd["stride-1"].len(), 1);
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let err = assert_err!(Settings::from_toml("[sessions]\nfailure_threshold = 0\n"));
        assert!(err.to_string().contains("failure_threshold"));
    }

    #[test]
    fn test_rejects_per_swap_above_user_total() {
        let err = assert_err!(Settings::from_toml(
            "[planner]\nmax_swap_amount = \"800\"\nmax_user_total = \"500\"\n"
        ));
        assert!(err.to_string().contains("max_user_total"));
    }

    #[test]
    fn test_registry_override() {
        let settings = Settings::from_toml(
            r#"
            [[registry.chains]]
            id = "365"
            name = "Theta Testnet"
            family = "evm"

            [[registry.chains]]
            id = "stride-internal-1"
            name = "Stride Testnet"
            family = "cosmos"
            delayed_indexing = true

            [[registry.tokens]]
            symbol = "TFUEL"
            name = "Theta Fuel"
            decimals = 18
            family = "evm"
            chain_id = "365"

            [[registry.tokens]]
            symbol = "stkATOM"
            name = "Staked ATOM"
            decimals = 6
            family = "cosmos"
            chain_id = "stride-internal-1"
            asset = { denom = "stuatom" }
            liquid_staking = true
            underlying = "ATOM"
            "#,
        )
        .unwrap();

        let registry = settings.token_registry().unwrap();
        assert_eq!(registry.tokens().len(), 2);
        assert!(registry.token("USDC").is_err());
    }

    #[test]
    fn test_default_config_file_parses() {
        let settings = assert_ok!(Settings::from_toml(include_str!("../config/default.toml")));
        assert!(settings.indexers.lcd.contains_key("stride-1"));
    }
}
