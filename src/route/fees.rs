//! Fee estimation for plan steps

use super::planner::{Step, StepKind};
use crate::config::FeeConfig;
use crate::error::OrchestratorResult;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fee contribution of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepFee {
    pub gas: Decimal,
    pub bridge_fee: Decimal,
}

/// Aggregate fee advertised on a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub gas: Decimal,
    pub bridge_fee: Decimal,
    pub total: Decimal,
    /// False while the plan still carries the fallback estimate
    pub refined: bool,
}

impl FeeEstimate {
    pub fn fallback(gas: Decimal, bridge_fee: Decimal) -> Self {
        Self {
            gas,
            bridge_fee,
            total: gas + bridge_fee,
            refined: false,
        }
    }

    pub fn refined<'a>(fees: impl IntoIterator<Item = &'a StepFee>) -> Self {
        let (gas, bridge_fee) = fees
            .into_iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(gas, bridge), fee| {
                (gas + fee.gas, bridge + fee.bridge_fee)
            });
        Self {
            gas,
            bridge_fee,
            total: gas + bridge_fee,
            refined: true,
        }
    }
}

/// Source of per-step gas and bridge fee quotes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeeEstimator: Send + Sync {
    async fn estimate(&self, step: &Step) -> OrchestratorResult<StepFee>;
}

/// Configured per-kind gas plus a flat bridge fee on the bridge step
pub struct StaticFeeEstimator {
    config: FeeConfig,
}

impl StaticFeeEstimator {
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl FeeEstimator for StaticFeeEstimator {
    async fn estimate(&self, step: &Step) -> OrchestratorResult<StepFee> {
        let fee = match step.kind {
            StepKind::LocalSwap => StepFee {
                gas: self.config.local_swap_gas,
                bridge_fee: Decimal::ZERO,
            },
            StepKind::BridgeTransfer => StepFee {
                gas: self.config.bridge_gas,
                bridge_fee: self.config.bridge_fee,
            },
            StepKind::Stake => StepFee {
                gas: self.config.stake_gas,
                bridge_fee: Decimal::ZERO,
            },
            StepKind::Unstake => StepFee {
                gas: self.config.unstake_gas,
                bridge_fee: Decimal::ZERO,
            },
        };
        Ok(fee)
    }
}
