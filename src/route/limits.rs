//! Cumulative per-account swap allowance
//!
//! Totals only grow when a run completes. Accounts are keyed case-insensitively
//! so checksummed and lowercase EVM addresses share one total.

use crate::error::{OrchestratorError, OrchestratorResult};

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allowance {
    pub account: String,
    pub total: Decimal,
    /// `None` when no cumulative limit is configured
    pub limit: Option<Decimal>,
    pub remaining: Option<Decimal>,
}

#[derive(Debug, Default)]
pub struct UserLimits {
    max_total: Option<Decimal>,
    totals: DashMap<String, Decimal>,
}

impl UserLimits {
    pub fn new(max_total: Option<Decimal>) -> Self {
        Self {
            max_total,
            totals: DashMap::new(),
        }
    }

    /// No cumulative limit
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.max_total.is_some()
    }

    pub fn total(&self, account: &str) -> Decimal {
        self.totals
            .get(&key(account))
            .map(|t| *t.value())
            .unwrap_or(Decimal::ZERO)
    }

    pub fn allowance(&self, account: &str) -> Allowance {
        let total = self.total(account);
        Allowance {
            account: key(account),
            total,
            limit: self.max_total,
            remaining: self
                .max_total
                .map(|limit| (limit - total).max(Decimal::ZERO)),
        }
    }

    /// Check that `amount` fits in the account's remaining allowance and
    /// return what would remain after it.
    pub fn check(&self, account: &str, amount: Decimal) -> OrchestratorResult<Option<Decimal>> {
        let Some(limit) = self.max_total else {
            return Ok(None);
        };

        let total = self.total(account);
        let remaining = (limit - total).max(Decimal::ZERO);
        if amount > remaining {
            debug!(
                "Account {} over cumulative limit: {} + {} > {}",
                account, total, amount, limit
            );
            return Err(OrchestratorError::LimitExceeded {
                scope: "remaining account",
                amount: amount.to_string(),
                limit: remaining.to_string(),
            });
        }

        Ok(Some(remaining - amount))
    }

    /// Add a completed swap to the account's total
    pub fn record(&self, account: &str, amount: Decimal) {
        let mut total = self.totals.entry(key(account)).or_insert(Decimal::ZERO);
        *total += amount;
        info!("Account {} swapped {} in total", account, *total);
    }

    pub fn reset(&self, account: &str) {
        self.totals.remove(&key(account));
    }
}

fn key(account: &str) -> String {
    account.to_lowercase()
}
