//! Asset catalog and the simulated market step.
//!
//! The catalog is seeded once at ledger initialization and perturbed per tick;
//! assets are never added or removed at runtime.

#![expect(
    clippy::float_arithmetic,
    reason = "dedicated market-math module; arithmetic is intentional"
)]

use rand::Rng;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::MarketConfig;
use crate::errors::LedgerError;

/// A tradable token the sandbox recognizes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub symbol: String,
    pub name: String,
    /// Current unit price in USD.
    pub price: f64,
    /// Annualized yield fraction paid on supplied balances (0.0312 = 3.12%).
    pub supply_rate: f64,
    /// Annualized cost fraction charged on borrowed balances.
    pub borrow_rate: f64,
    /// Fraction in [0,1]: borrowing power granted per USD of this collateral.
    pub collateral_factor: f64,
    /// Stablecoins stay pinned at $1.00 through every market step.
    #[serde(default)]
    pub stable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct AssetCatalog {
    assets: BTreeMap<String, Asset>,
}

impl AssetCatalog {
    pub fn from_assets(seed: &[Asset]) -> Self {
        Self {
            assets: seed
                .iter()
                .map(|a| (a.symbol.clone(), a.clone()))
                .collect(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Asset> {
        self.assets.get(symbol)
    }

    pub fn require(&self, symbol: &str) -> Result<&Asset, LedgerError> {
        self.assets
            .get(symbol)
            .ok_or_else(|| LedgerError::AssetNotFound(symbol.to_owned()))
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn set_price(&mut self, symbol: &str, price: f64) -> bool {
        match self.assets.get_mut(symbol) {
            Some(a) if price.is_finite() && price >= 0.0_f64 => {
                a.price = price;
                true
            }
            Some(_) | None => false,
        }
    }

    /// Advance the market by one tick.
    ///
    /// Non-stable prices random-walk within ±`price_walk_pct`; rates random-walk
    /// within ±`rate_walk_pp` and are clamped so that borrow stays above supply
    /// by at least `min_rate_spread` at all times.
    pub fn step(&mut self, walk: &MarketConfig, rng: &mut impl Rng) {
        for a in self.assets.values_mut() {
            if a.stable {
                a.price = 1.0_f64;
            } else {
                let drift = rng.random_range(-walk.price_walk_pct..=walk.price_walk_pct);
                a.price *= 1.0_f64 + drift;
            }

            let supply_drift = rng.random_range(-walk.rate_walk_pp..=walk.rate_walk_pp);
            a.supply_rate =
                (a.supply_rate + supply_drift).clamp(walk.supply_rate_min, walk.supply_rate_max);

            let borrow_drift = rng.random_range(-walk.rate_walk_pp..=walk.rate_walk_pp);
            let borrow_floor = (a.supply_rate + walk.min_rate_spread).max(walk.supply_rate_min);
            a.borrow_rate =
                (a.borrow_rate + borrow_drift).clamp(borrow_floor, walk.borrow_rate_max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use rand::{rngs::StdRng, SeedableRng as _};

    fn seeded_catalog() -> (AssetCatalog, MarketConfig) {
        let cfg = SimConfig::default();
        (AssetCatalog::from_assets(&cfg.seed.assets), cfg.market)
    }

    #[test]
    fn stable_price_is_pinned() {
        let (mut catalog, walk) = seeded_catalog();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            catalog.step(&walk, &mut rng);
        }
        let usdc = catalog.get("USDC");
        assert!(usdc.is_some(), "seed catalog must contain USDC");
        if let Some(a) = usdc {
            assert!((a.price - 1.0_f64).abs() < f64::EPSILON, "USDC drifted: {}", a.price);
        }
    }

    #[test]
    fn rate_clamps_hold_under_long_walks() {
        let (mut catalog, walk) = seeded_catalog();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..2_000 {
            catalog.step(&walk, &mut rng);
            for a in catalog.assets() {
                assert!(
                    a.supply_rate >= walk.supply_rate_min && a.supply_rate <= walk.supply_rate_max,
                    "{} supply rate out of range: {}",
                    a.symbol,
                    a.supply_rate
                );
                assert!(
                    a.borrow_rate <= walk.borrow_rate_max,
                    "{} borrow rate above max: {}",
                    a.symbol,
                    a.borrow_rate
                );
                assert!(
                    a.borrow_rate - a.supply_rate >= walk.min_rate_spread - 1e-12_f64,
                    "{} spread collapsed: supply={} borrow={}",
                    a.symbol,
                    a.supply_rate,
                    a.borrow_rate
                );
            }
        }
    }

    #[test]
    fn prices_stay_positive() {
        let (mut catalog, walk) = seeded_catalog();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..2_000 {
            catalog.step(&walk, &mut rng);
            for a in catalog.assets() {
                assert!(a.price > 0.0_f64, "{} price went non-positive", a.symbol);
            }
        }
    }

    #[test]
    fn set_price_rejects_garbage() {
        let (mut catalog, _) = seeded_catalog();
        assert!(!catalog.set_price("WETH", f64::NAN));
        assert!(!catalog.set_price("WETH", -1.0_f64));
        assert!(!catalog.set_price("NOPE", 1.0_f64));
        assert!(catalog.set_price("WETH", 1_234.5_f64));
    }
}
