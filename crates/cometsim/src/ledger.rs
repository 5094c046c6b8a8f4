//! The position ledger: per-user supplied/borrowed balances, wallet balances,
//! and the transaction log, with every mutation guarded by its preconditions.
//!
//! The ledger is pure in-memory state. Persistence and cross-process locking
//! live in `store`; this module never does I/O.

#![expect(
    clippy::float_arithmetic,
    reason = "dedicated balance-math module; arithmetic is intentional"
)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::activity::utc_now_iso;
use crate::analytics;
use crate::config::SeedConfig;
use crate::errors::LedgerError;
use crate::market::AssetCatalog;

/// Balances this close to zero are treated as zero, so boundary operations
/// (borrow exactly to the limit, full withdraw after accrual) are not rejected
/// by float rounding.
pub const AMOUNT_EPS: f64 = 1e-9;

/// An amount of one asset a user has supplied or borrowed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    /// Asset units, not USD.
    pub amount: f64,
    /// Rate snapshot applied at the last accrual.
    pub interest_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Supply,
    Borrow,
    Withdraw,
    Repay,
}

/// Immutable record of a completed ledger mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub kind: TxKind,
    pub asset: String,
    pub amount: f64,
    /// RFC-3339 UTC timestamp.
    pub ts: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Ledger {
    /// At most one position per symbol; an entry drained to zero is removed.
    pub supplied: BTreeMap<String, Position>,
    pub borrowed: BTreeMap<String, Position>,
    /// Liquid balances, mutated inversely to position changes.
    pub wallet: BTreeMap<String, f64>,
    /// Newest first.
    pub transactions: Vec<Transaction>,
}

fn validate_amount(amount: f64) -> Result<(), LedgerError> {
    if amount.is_finite() && amount > 0.0_f64 {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount)
    }
}

impl Ledger {
    pub fn seeded(seed: &SeedConfig) -> Self {
        Self {
            wallet: seed.wallet.clone(),
            ..Self::default()
        }
    }

    pub fn wallet_balance(&self, symbol: &str) -> f64 {
        self.wallet.get(symbol).copied().unwrap_or(0.0_f64)
    }

    fn record(&mut self, kind: TxKind, asset: &str, amount: f64) {
        self.transactions.insert(
            0,
            Transaction {
                id: Uuid::new_v4().to_string(),
                kind,
                asset: asset.to_owned(),
                amount,
                ts: utc_now_iso(),
            },
        );
    }

    fn credit_wallet(&mut self, symbol: &str, amount: f64) {
        let bal = self.wallet.entry(symbol.to_owned()).or_insert(0.0_f64);
        *bal += amount;
    }

    fn debit_wallet(&mut self, symbol: &str, amount: f64) {
        let bal = self.wallet.entry(symbol.to_owned()).or_insert(0.0_f64);
        *bal -= amount;
        if bal.abs() <= AMOUNT_EPS {
            *bal = 0.0_f64;
        }
    }

    fn grow_position(
        positions: &mut BTreeMap<String, Position>,
        symbol: &str,
        amount: f64,
        rate: f64,
    ) {
        let p = positions.entry(symbol.to_owned()).or_insert_with(|| Position {
            symbol: symbol.to_owned(),
            amount: 0.0_f64,
            interest_rate: rate,
        });
        p.amount += amount;
        p.interest_rate = rate;
    }

    fn shrink_position(positions: &mut BTreeMap<String, Position>, symbol: &str, amount: f64) {
        let drained = match positions.get_mut(symbol) {
            Some(p) => {
                p.amount -= amount;
                p.amount <= AMOUNT_EPS
            }
            None => false,
        };
        if drained {
            positions.remove(symbol);
        }
    }

    /// Move funds from the wallet into a supplied position.
    pub fn supply(
        &mut self,
        catalog: &AssetCatalog,
        symbol: &str,
        amount: f64,
    ) -> Result<(), LedgerError> {
        validate_amount(amount)?;
        let asset = catalog.require(symbol)?;
        let rate = asset.supply_rate;

        let available = self.wallet_balance(symbol);
        if available + AMOUNT_EPS < amount {
            return Err(LedgerError::InsufficientBalance {
                symbol: symbol.to_owned(),
                available,
                requested: amount,
            });
        }

        self.debit_wallet(symbol, amount);
        Self::grow_position(&mut self.supplied, symbol, amount, rate);
        self.record(TxKind::Supply, symbol, amount);
        Ok(())
    }

    /// Borrow against supplied collateral, up to the borrow limit (equality
    /// allowed).
    pub fn borrow(
        &mut self,
        catalog: &AssetCatalog,
        symbol: &str,
        amount: f64,
    ) -> Result<(), LedgerError> {
        validate_amount(amount)?;
        let asset = catalog.require(symbol)?;
        let rate = asset.borrow_rate;
        let price = asset.price;

        let borrow_limit = analytics::borrow_limit(&self.supplied, catalog);
        let projected_value = analytics::total_value(&self.borrowed, catalog) + amount * price;
        if projected_value > borrow_limit + AMOUNT_EPS {
            return Err(LedgerError::ExceedsBorrowLimit {
                projected_value,
                borrow_limit,
            });
        }

        self.credit_wallet(symbol, amount);
        Self::grow_position(&mut self.borrowed, symbol, amount, rate);
        self.record(TxKind::Borrow, symbol, amount);
        Ok(())
    }

    /// Withdraw supplied collateral back to the wallet. Rejected entirely when
    /// it would leave outstanding debt above the reduced borrow limit; there is
    /// no partial withdrawal.
    pub fn withdraw(
        &mut self,
        catalog: &AssetCatalog,
        symbol: &str,
        amount: f64,
    ) -> Result<(), LedgerError> {
        validate_amount(amount)?;
        let asset = catalog.require(symbol)?;

        let supplied_amount = self.supplied.get(symbol).map_or(0.0_f64, |p| p.amount);
        if supplied_amount + AMOUNT_EPS < amount {
            return Err(LedgerError::InsufficientSuppliedBalance {
                symbol: symbol.to_owned(),
                supplied: supplied_amount,
                requested: amount,
            });
        }

        let borrowed_value = analytics::total_value(&self.borrowed, catalog);
        if borrowed_value > 0.0_f64 {
            let projected_limit = analytics::borrow_limit(&self.supplied, catalog)
                - amount * asset.price * asset.collateral_factor;
            if projected_limit + AMOUNT_EPS < borrowed_value {
                return Err(LedgerError::PositionAtRisk {
                    borrowed_value,
                    projected_limit,
                });
            }
        }

        Self::shrink_position(&mut self.supplied, symbol, amount);
        self.credit_wallet(symbol, amount);
        self.record(TxKind::Withdraw, symbol, amount);
        Ok(())
    }

    /// Repay outstanding debt. Over-repayment clamps to the outstanding amount;
    /// the clamped amount actually repaid is returned.
    pub fn repay(
        &mut self,
        catalog: &AssetCatalog,
        symbol: &str,
        amount: f64,
    ) -> Result<f64, LedgerError> {
        validate_amount(amount)?;
        catalog.require(symbol)?;

        let outstanding = match self.borrowed.get(symbol) {
            Some(p) => p.amount,
            None => return Err(LedgerError::AssetNotBorrowed(symbol.to_owned())),
        };
        let clamped = amount.min(outstanding);

        let available = self.wallet_balance(symbol);
        if available + AMOUNT_EPS < clamped {
            return Err(LedgerError::InsufficientBalance {
                symbol: symbol.to_owned(),
                available,
                requested: clamped,
            });
        }

        self.debit_wallet(symbol, clamped);
        Self::shrink_position(&mut self.borrowed, symbol, clamped);
        self.record(TxKind::Repay, symbol, clamped);
        Ok(clamped)
    }

    /// Advance simulated interest by `ticks` compounding periods.
    ///
    /// Deterministic for a fixed tick count: each position grows by
    /// `(1 + rate/periods_per_year)^ticks` using the catalog's current rate,
    /// and the position's rate snapshot is refreshed. Positions whose asset has
    /// left the catalog keep compounding on their last snapshot.
    pub fn accrue(&mut self, catalog: &AssetCatalog, periods_per_year: u32, ticks: u32) {
        if ticks == 0 {
            return;
        }
        let periods = f64::from(periods_per_year);
        let n = i32::try_from(ticks).unwrap_or(i32::MAX);
        for p in self.supplied.values_mut() {
            let rate = catalog.get(&p.symbol).map_or(p.interest_rate, |a| a.supply_rate);
            p.amount *= (1.0_f64 + rate / periods).powi(n);
            p.interest_rate = rate;
        }
        for p in self.borrowed.values_mut() {
            let rate = catalog.get(&p.symbol).map_or(p.interest_rate, |a| a.borrow_rate);
            p.amount *= (1.0_f64 + rate / periods).powi(n);
            p.interest_rate = rate;
        }
    }

    /// Clear everything back to the fixed seed state.
    pub fn reset(&mut self, seed: &SeedConfig) {
        *self = Self::seeded(seed);
    }

    /// Set wallet balances back to the seed amounts without touching positions,
    /// and record a synthetic supply transaction for the base-asset refill.
    pub fn refill_wallet(&mut self, seed: &SeedConfig) {
        for (symbol, amount) in &seed.wallet {
            self.wallet.insert(symbol.clone(), *amount);
        }
        let refill = seed.wallet.get(&seed.base_asset).copied().unwrap_or(0.0_f64);
        self.record(TxKind::Supply, &seed.base_asset, refill);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::market::AssetCatalog;

    fn setup() -> (Ledger, AssetCatalog, SimConfig) {
        let cfg = SimConfig::default();
        let catalog = AssetCatalog::from_assets(&cfg.seed.assets);
        let ledger = Ledger::seeded(&cfg.seed);
        (ledger, catalog, cfg)
    }

    #[test]
    fn supply_moves_wallet_into_position() {
        let (mut ledger, catalog, _) = setup();
        let r = ledger.supply(&catalog, "USDC", 5_000.0_f64);
        assert!(r.is_ok(), "supply failed: {r:?}");
        assert!((ledger.wallet_balance("USDC") - 5_000.0_f64).abs() < 1e-9_f64);
        let supplied = ledger.supplied.get("USDC").map_or(0.0_f64, |p| p.amount);
        assert!((supplied - 5_000.0_f64).abs() < 1e-9_f64);
        assert!(
            (analytics::borrow_limit(&ledger.supplied, &catalog) - 4_000.0_f64).abs() < 1e-9_f64
        );
        assert_eq!(ledger.transactions.first().map(|t| t.kind), Some(TxKind::Supply));
    }

    #[test]
    fn borrow_up_to_limit_succeeds_and_one_more_fails() {
        let (mut ledger, catalog, _) = setup();
        assert!(ledger.supply(&catalog, "USDC", 5_000.0_f64).is_ok());

        let r = ledger.borrow(&catalog, "USDC", 4_000.0_f64);
        assert!(r.is_ok(), "borrow at the limit must succeed: {r:?}");
        assert!((ledger.wallet_balance("USDC") - 9_000.0_f64).abs() < 1e-9_f64);

        let before = ledger.clone();
        let r = ledger.borrow(&catalog, "USDC", 1.0_f64);
        assert!(
            matches!(r, Err(LedgerError::ExceedsBorrowLimit { .. })),
            "expected ExceedsBorrowLimit, got {r:?}"
        );
        assert_eq!(ledger, before, "failed borrow must not change state");
    }

    #[test]
    fn withdraw_that_would_strand_debt_is_rejected_whole() {
        let (mut ledger, catalog, _) = setup();
        assert!(ledger.supply(&catalog, "USDC", 5_000.0_f64).is_ok());
        assert!(ledger.borrow(&catalog, "USDC", 4_000.0_f64).is_ok());

        let before = ledger.clone();
        let r = ledger.withdraw(&catalog, "USDC", 100.0_f64);
        assert!(
            matches!(r, Err(LedgerError::PositionAtRisk { .. })),
            "expected PositionAtRisk, got {r:?}"
        );
        assert_eq!(ledger, before, "rejected withdrawal must not change state");
    }

    #[test]
    fn over_repay_clamps_and_clears_the_position() {
        let (mut ledger, catalog, _) = setup();
        assert!(ledger.supply(&catalog, "USDC", 5_000.0_f64).is_ok());
        assert!(ledger.borrow(&catalog, "USDC", 4_000.0_f64).is_ok());

        let repaid = ledger.repay(&catalog, "USDC", 5_000.0_f64);
        assert!(repaid.is_ok(), "repay failed: {repaid:?}");
        assert_eq!(repaid.ok(), Some(4_000.0_f64));
        assert!((ledger.wallet_balance("USDC") - 5_000.0_f64).abs() < 1e-9_f64);
        assert!(!ledger.borrowed.contains_key("USDC"), "borrowed entry must be removed");
    }

    #[test]
    fn refill_restores_wallet_but_not_positions() {
        let (mut ledger, catalog, cfg) = setup();
        assert!(ledger.supply(&catalog, "USDC", 5_000.0_f64).is_ok());
        assert!(ledger.borrow(&catalog, "USDC", 1_000.0_f64).is_ok());

        ledger.refill_wallet(&cfg.seed);
        assert!((ledger.wallet_balance("USDC") - 10_000.0_f64).abs() < 1e-9_f64);
        assert!(ledger.supplied.contains_key("USDC"), "positions must survive a refill");
        assert!(ledger.borrowed.contains_key("USDC"));
        let newest = ledger.transactions.first();
        assert!(newest.is_some(), "refill must record a transaction");
        if let Some(t) = newest {
            assert_eq!(t.kind, TxKind::Supply);
            assert_eq!(t.asset, "USDC");
            assert!((t.amount - 10_000.0_f64).abs() < 1e-9_f64);
        }
    }

    #[test]
    fn reset_is_idempotent() {
        let (mut ledger, catalog, cfg) = setup();
        assert!(ledger.supply(&catalog, "WETH", 2.0_f64).is_ok());
        assert!(ledger.borrow(&catalog, "USDC", 500.0_f64).is_ok());

        ledger.reset(&cfg.seed);
        let once = ledger.clone();
        ledger.reset(&cfg.seed);
        assert_eq!(ledger, once);
        assert!(ledger.supplied.is_empty() && ledger.borrowed.is_empty());
        assert!(ledger.transactions.is_empty());
    }

    #[test]
    fn conservation_without_accrual() {
        let (mut ledger, catalog, _) = setup();
        let total = |l: &Ledger| {
            l.wallet_balance("WETH") + l.supplied.get("WETH").map_or(0.0_f64, |p| p.amount)
        };
        let start = total(&ledger);
        assert!(ledger.supply(&catalog, "WETH", 3.0_f64).is_ok());
        assert!(ledger.withdraw(&catalog, "WETH", 1.25_f64).is_ok());
        assert!(ledger.supply(&catalog, "WETH", 0.5_f64).is_ok());
        assert!(ledger.withdraw(&catalog, "WETH", 2.25_f64).is_ok());
        assert!(
            (total(&ledger) - start).abs() < 1e-9_f64,
            "wallet + supplied must be invariant, drifted to {}",
            total(&ledger)
        );
    }

    #[test]
    fn no_zero_residue_positions() {
        let (mut ledger, catalog, _) = setup();
        assert!(ledger.supply(&catalog, "WETH", 3.0_f64).is_ok());
        assert!(ledger.withdraw(&catalog, "WETH", 3.0_f64).is_ok());
        assert!(!ledger.supplied.contains_key("WETH"), "full withdraw must remove the entry");
        for p in ledger.supplied.values().chain(ledger.borrowed.values()) {
            assert!(p.amount > 0.0_f64, "{}: zero/negative residue", p.symbol);
        }
    }

    #[test]
    fn borrow_limit_safety_after_mutations() {
        let (mut ledger, catalog, _) = setup();
        assert!(ledger.supply(&catalog, "USDC", 8_000.0_f64).is_ok());
        assert!(ledger.borrow(&catalog, "USDC", 3_000.0_f64).is_ok());
        assert!(ledger.withdraw(&catalog, "USDC", 4_000.0_f64).is_ok());
        let limit = analytics::borrow_limit(&ledger.supplied, &catalog);
        let borrowed = analytics::total_value(&ledger.borrowed, &catalog);
        assert!(
            borrowed <= limit + AMOUNT_EPS,
            "borrowed {borrowed} exceeds limit {limit}"
        );
    }

    #[test]
    fn accrual_is_deterministic_and_compounds() {
        let (mut ledger, catalog, cfg) = setup();
        assert!(ledger.supply(&catalog, "USDC", 1_000.0_f64).is_ok());
        assert!(ledger.borrow(&catalog, "USDC", 500.0_f64).is_ok());

        let supply_rate = catalog.get("USDC").map_or(0.0_f64, |a| a.supply_rate);
        let borrow_rate = catalog.get("USDC").map_or(0.0_f64, |a| a.borrow_rate);
        let p = f64::from(cfg.accrual.periods_per_year);

        ledger.accrue(&catalog, cfg.accrual.periods_per_year, 12);

        let expected_supplied = 1_000.0_f64 * (1.0_f64 + supply_rate / p).powi(12);
        let expected_borrowed = 500.0_f64 * (1.0_f64 + borrow_rate / p).powi(12);
        let got_supplied = ledger.supplied.get("USDC").map_or(0.0_f64, |q| q.amount);
        let got_borrowed = ledger.borrowed.get("USDC").map_or(0.0_f64, |q| q.amount);
        assert!((got_supplied - expected_supplied).abs() < 1e-9_f64);
        assert!((got_borrowed - expected_borrowed).abs() < 1e-9_f64);
        assert!(got_borrowed > 500.0_f64, "debt must grow under accrual");
    }

    #[test]
    fn invalid_amounts_are_rejected() {
        let (mut ledger, catalog, _) = setup();
        for bad in [0.0_f64, -1.0_f64, f64::NAN, f64::INFINITY] {
            let r = ledger.supply(&catalog, "USDC", bad);
            assert!(
                matches!(r, Err(LedgerError::InvalidAmount)),
                "amount {bad} must be rejected, got {r:?}"
            );
        }
    }

    #[test]
    fn unknown_asset_is_rejected() {
        let (mut ledger, catalog, _) = setup();
        let r = ledger.borrow(&catalog, "DOGE", 1.0_f64);
        assert!(matches!(r, Err(LedgerError::AssetNotFound(_))), "got {r:?}");
    }

    #[test]
    fn repay_without_debt_is_rejected() {
        let (mut ledger, catalog, _) = setup();
        let r = ledger.repay(&catalog, "USDC", 10.0_f64);
        assert!(matches!(r, Err(LedgerError::AssetNotBorrowed(_))), "got {r:?}");
    }
}
