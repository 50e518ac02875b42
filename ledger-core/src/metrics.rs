//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_deposits_total` - Deposits committed
//! - `ledger_debits_total` - Debits committed
//! - `ledger_insufficient_balance_total` - Debits rejected for lack of funds
//! - `ledger_recharge_codes_issued_total` - Recharge codes issued
//! - `ledger_recharge_codes_redeemed_total` - Recharge codes redeemed
//! - `ledger_recharge_codes_voided_total` - Recharge codes voided
//! - `ledger_accounts` - Accounts opened

use prometheus::{IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
///
/// Each instance owns its registry, so several ledgers (or tests) can live in
/// one process without colliding in the default registry.
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Deposits committed
    pub deposits_total: IntCounter,

    /// Debits committed
    pub debits_total: IntCounter,

    /// Debits rejected with insufficient balance
    pub insufficient_balance_total: IntCounter,

    /// Recharge codes issued
    pub codes_issued_total: IntCounter,

    /// Recharge codes redeemed
    pub codes_redeemed_total: IntCounter,

    /// Recharge codes voided
    pub codes_voided_total: IntCounter,

    /// Accounts opened
    pub accounts: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let deposits_total = IntCounter::new("ledger_deposits_total", "Deposits committed")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let debits_total = IntCounter::new("ledger_debits_total", "Debits committed")?;
        registry.register(Box::new(debits_total.clone()))?;

        let insufficient_balance_total = IntCounter::new(
            "ledger_insufficient_balance_total",
            "Debits rejected for insufficient balance",
        )?;
        registry.register(Box::new(insufficient_balance_total.clone()))?;

        let codes_issued_total = IntCounter::new(
            "ledger_recharge_codes_issued_total",
            "Recharge codes issued",
        )?;
        registry.register(Box::new(codes_issued_total.clone()))?;

        let codes_redeemed_total = IntCounter::new(
            "ledger_recharge_codes_redeemed_total",
            "Recharge codes redeemed",
        )?;
        registry.register(Box::new(codes_redeemed_total.clone()))?;

        let codes_voided_total = IntCounter::new(
            "ledger_recharge_codes_voided_total",
            "Recharge codes voided",
        )?;
        registry.register(Box::new(codes_voided_total.clone()))?;

        let accounts = IntGauge::new("ledger_accounts", "Accounts opened")?;
        registry.register(Box::new(accounts.clone()))?;

        Ok(Self {
            deposits_total,
            debits_total,
            insufficient_balance_total,
            codes_issued_total,
            codes_redeemed_total,
            codes_voided_total,
            accounts,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.deposits_total.get(), 0);
        assert_eq!(metrics.accounts.get(), 0);
    }

    #[test]
    fn test_instances_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.deposits_total.inc();
        assert_eq!(a.deposits_total.get(), 1);
        assert_eq!(b.deposits_total.get(), 0);
        assert_eq!(a.registry().gather().len(), 7);
    }
}
