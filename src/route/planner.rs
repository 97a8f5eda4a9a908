//! Route planner
//!
//! Derives the ordered step list for a cross-family move. Planning is a pure
//! function of the two tokens and the registry; fees are filled in with a
//! fallback estimate and may be refined afterwards.

use super::fees::{FeeEstimate, FeeEstimator, StepFee};
use crate::chain::{ChainFamily, ChainId, Token, TokenRegistry};
use crate::config::PlannerConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    LocalSwap,
    BridgeTransfer,
    Stake,
    Unstake,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::LocalSwap => "local-swap",
            StepKind::BridgeTransfer => "bridge-transfer",
            StepKind::Stake => "stake",
            StepKind::Unstake => "unstake",
        }
    }

    /// Fixed duration estimate per kind
    pub fn estimated_duration(&self) -> Duration {
        match self {
            StepKind::LocalSwap => Duration::from_secs(5),
            StepKind::BridgeTransfer => Duration::from_secs(60),
            StepKind::Stake => Duration::from_secs(10),
            StepKind::Unstake => Duration::from_secs(15),
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRef {
    pub family: ChainFamily,
    pub chain_id: ChainId,
}

impl ChainRef {
    fn of(token: &Token) -> Self {
        Self {
            family: token.family,
            chain_id: token.chain_id.clone(),
        }
    }
}

/// Actor responsible for a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepOwner {
    Chain(ChainRef),
    /// The bridge network, a virtual actor spanning both chains
    Bridge {
        source: ChainRef,
        destination: ChainRef,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub kind: StepKind,
    pub description: String,
    pub owner: StepOwner,
    /// Symbol consumed by the step
    pub input: String,
    /// Symbol produced by the step
    pub output: String,
    pub estimated_seconds: u64,
}

impl Step {
    fn new(kind: StepKind, owner: StepOwner, input: &str, output: &str, description: String) -> Self {
        Self {
            kind,
            description,
            owner,
            input: input.to_string(),
            output: output.to_string(),
            estimated_seconds: kind.estimated_duration().as_secs(),
        }
    }

    /// Chain whose signer submits the step. Bridge steps are signed on the
    /// source side.
    pub fn signing_chain(&self) -> &ChainRef {
        match &self.owner {
            StepOwner::Chain(chain) => chain,
            StepOwner::Bridge { source, .. } => source,
        }
    }
}

/// Ordered execution plan for one move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub source: Token,
    pub destination: Token,
    pub amount: Decimal,
    pub steps: Vec<Step>,
    pub estimated_seconds: u64,
    pub fee: FeeEstimate,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn estimated_duration(&self) -> Duration {
        Duration::from_secs(self.estimated_seconds)
    }

    pub fn step_kinds(&self) -> Vec<StepKind> {
        self.steps.iter().map(|s| s.kind).collect()
    }
}

pub struct RoutePlanner {
    registry: Arc<TokenRegistry>,
    config: PlannerConfig,
}

impl RoutePlanner {
    pub fn new(registry: Arc<TokenRegistry>, config: PlannerConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    /// Plan by token symbol
    pub fn plan_symbols(
        &self,
        source: &str,
        destination: &str,
        amount: Decimal,
    ) -> OrchestratorResult<Plan> {
        let source = self.registry.token(source)?;
        let destination = self.registry.token(destination)?;
        self.plan(source, destination, amount)
    }

    pub fn plan(
        &self,
        source: &Token,
        destination: &Token,
        amount: Decimal,
    ) -> OrchestratorResult<Plan> {
        if !TokenRegistry::is_valid_pair(source, destination) {
            return Err(OrchestratorError::InvalidPair(format!(
                "{} and {} are both {} tokens",
                source.symbol, destination.symbol, source.family
            )));
        }
        if amount <= Decimal::ZERO {
            return Err(OrchestratorError::InvalidPair(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        if let Some(limit) = self.config.max_swap_amount {
            if amount > limit {
                return Err(OrchestratorError::LimitExceeded {
                    scope: "per-swap",
                    amount: amount.to_string(),
                    limit: limit.to_string(),
                });
            }
        }

        let source_chain = self.registry.chain_of(source)?;
        let destination_chain = self.registry.chain_of(destination)?;
        let mut steps = Vec::with_capacity(3);

        // What leaves the source chain over the bridge
        let mut carried = source.symbol.as_str();

        if source.is_liquid_staking() {
            let underlying = source.underlying.as_deref().unwrap_or(&source.symbol);
            steps.push(Step::new(
                StepKind::Unstake,
                StepOwner::Chain(ChainRef::of(source)),
                &source.symbol,
                underlying,
                format!("Unstake {} {} to {} on {}", amount, source.symbol, underlying, source_chain.name),
            ));
            carried = underlying;
        } else if let Some(bridge_token) = source_chain.bridge_token.as_deref() {
            if bridge_token != source.symbol {
                steps.push(Step::new(
                    StepKind::LocalSwap,
                    StepOwner::Chain(ChainRef::of(source)),
                    &source.symbol,
                    bridge_token,
                    format!("Swap {} {} to {} on {}", amount, source.symbol, bridge_token, source_chain.name),
                ));
                carried = bridge_token;
            }
        }

        // The destination receives the staking asset when it will be staked
        let delivered = if destination.is_liquid_staking() {
            destination.underlying.as_deref().unwrap_or(&destination.symbol)
        } else {
            destination.symbol.as_str()
        };

        steps.push(Step::new(
            StepKind::BridgeTransfer,
            StepOwner::Bridge {
                source: ChainRef::of(source),
                destination: ChainRef::of(destination),
            },
            carried,
            delivered,
            format!(
                "Bridge {} from {} to {} via Axelar",
                carried, source_chain.name, destination_chain.name
            ),
        ));

        if destination.is_liquid_staking() {
            steps.push(Step::new(
                StepKind::Stake,
                StepOwner::Chain(ChainRef::of(destination)),
                delivered,
                &destination.symbol,
                format!("Stake {} for {} on {}", delivered, destination.symbol, destination_chain.name),
            ));
        }

        let estimated_seconds = steps.iter().map(|s| s.estimated_seconds).sum();
        let plan = Plan {
            id: Uuid::new_v4(),
            source: source.clone(),
            destination: destination.clone(),
            amount,
            steps,
            estimated_seconds,
            fee: FeeEstimate::fallback(self.config.fallback_gas, self.config.fallback_bridge_fee),
            created_at: Utc::now(),
        };

        info!(
            "Planned {} {} -> {}: [{}] (~{}s)",
            amount,
            source.symbol,
            destination.symbol,
            plan.steps
                .iter()
                .map(|s| s.kind.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            estimated_seconds
        );
        metrics::record_plan_created(source.family.as_str(), destination.family.as_str());

        Ok(plan)
    }

    /// Replace the plan's fee with per-step quotes. On error the fallback
    /// estimate is left untouched.
    pub async fn refine_fee(
        &self,
        plan: &mut Plan,
        estimator: &dyn FeeEstimator,
    ) -> OrchestratorResult<()> {
        let mut fees: Vec<StepFee> = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            fees.push(estimator.estimate(step).await?);
        }
        plan.fee = FeeEstimate::refined(&fees);
        debug!("Refined fee for plan {}: {}", plan.id, plan.fee.total);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::fees::{MockFeeEstimator, StaticFeeEstimator};
    use crate::test_utils::dec;

    fn planner() -> RoutePlanner {
        RoutePlanner::new(Arc::new(TokenRegistry::builtin()), PlannerConfig::default())
    }

    #[test]
    fn test_theta_to_liquid_staking() {
        let plan = planner().plan_symbols("TFUEL", "stkATOM", dec("100")).unwrap();

        assert_eq!(
            plan.step_kinds(),
            vec![StepKind::LocalSwap, StepKind::BridgeTransfer, StepKind::Stake]
        );
        assert_eq!(plan.estimated_seconds, 75);
        assert_eq!(plan.steps[0].output, "USDC");
        assert_eq!(plan.steps[1].input, "USDC");
        assert_eq!(plan.steps[1].output, "ATOM");
        assert_eq!(plan.steps[2].signing_chain().chain_id.as_str(), "stride-1");
    }

    #[test]
    fn test_liquid_staking_to_theta() {
        let plan = planner().plan_symbols("stkATOM", "TFUEL", dec("100")).unwrap();

        assert_eq!(
            plan.step_kinds(),
            vec![StepKind::Unstake, StepKind::BridgeTransfer]
        );
        assert_eq!(plan.estimated_seconds, 75);
        assert_eq!(plan.steps[1].input, "ATOM");
        assert_eq!(plan.steps[1].signing_chain().family, ChainFamily::Cosmos);
    }

    #[test]
    fn test_bridge_token_skips_local_swap() {
        let plan = planner().plan_symbols("USDC", "stkTIA", dec("5")).unwrap();
        assert_eq!(
            plan.step_kinds(),
            vec![StepKind::BridgeTransfer, StepKind::Stake]
        );

        let plan = planner().plan_symbols("TFUEL", "ATOM", dec("5")).unwrap();
        assert_eq!(
            plan.step_kinds(),
            vec![StepKind::LocalSwap, StepKind::BridgeTransfer]
        );
    }

    #[test]
    fn test_planning_is_deterministic() {
        let planner = planner();
        let a = planner.plan_symbols("TFUEL", "stkOSMO", dec("42")).unwrap();
        let b = planner.plan_symbols("TFUEL", "stkOSMO", dec("42")).unwrap();
        assert_eq!(a.steps, b.steps);
        assert_eq!(a.estimated_seconds, b.estimated_seconds);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_same_family_is_invalid() {
        let err = planner().plan_symbols("TFUEL", "USDC", dec("1")).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidPair(_)));

        let err = planner().plan_symbols("stkATOM", "stkTIA", dec("1")).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidPair(_)));
    }

    #[test]
    fn test_non_positive_amount_is_invalid() {
        for amount in ["0", "-3"] {
            let err = planner()
                .plan_symbols("TFUEL", "stkATOM", dec(amount))
                .unwrap_err();
            assert!(matches!(err, OrchestratorError::InvalidPair(_)));
        }
    }

    #[test]
    fn test_limit_and_unknown_token() {
        let err = planner()
            .plan_symbols("TFUEL", "stkATOM", dec("1000.01"))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::LimitExceeded { .. }));
        assert!(planner().plan_symbols("TFUEL", "stkATOM", dec("1000")).is_ok());

        let unlimited = RoutePlanner::new(
            Arc::new(TokenRegistry::builtin()),
            PlannerConfig {
                max_swap_amount: None,
                ..PlannerConfig::default()
            },
        );
        assert!(unlimited.plan_symbols("TFUEL", "stkATOM", dec("5000")).is_ok());

        let err = planner().plan_symbols("TFUEL", "stkDOGE", dec("1")).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownToken(_)));
    }

    #[tokio::test]
    async fn test_refine_fee_replaces_only_fee() {
        let planner = planner();
        let mut plan = planner.plan_symbols("TFUEL", "stkATOM", dec("100")).unwrap();
        let original = plan.clone();
        assert!(!plan.fee.refined);
        assert_eq!(plan.fee.total, dec("2.1"));

        let estimator = StaticFeeEstimator::new(crate::config::FeeConfig::default());
        planner.refine_fee(&mut plan, &estimator).await.unwrap();

        assert!(plan.fee.refined);
        assert_eq!(plan.fee.bridge_fee, dec("1.5"));
        assert_eq!(plan.steps, original.steps);
        assert_eq!(plan.id, original.id);
    }

    #[tokio::test]
    async fn test_refine_fee_error_keeps_fallback() {
        let planner = planner();
        let mut plan = planner.plan_symbols("stkATOM", "TFUEL", dec("1")).unwrap();

        let mut estimator = MockFeeEstimator::new();
        estimator
            .expect_estimate()
            .returning(|_| Err(OrchestratorError::Internal("quote service down".into())));

        assert!(planner.refine_fee(&mut plan, &estimator).await.is_err());
        assert!(!plan.fee.refined);
    }
}
