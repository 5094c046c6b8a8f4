//! Centralised position risk metrics.
//!
//! Every consumer (CLI views, the ledger's borrow/withdraw guards, the daemon)
//! computes collateral value, borrow limit, and health factor through this one
//! module so the constants cannot drift between call sites.

#![expect(
    clippy::float_arithmetic,
    reason = "dedicated risk-math module; arithmetic is intentional"
)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::RiskConfig;
use crate::ledger::Position;
use crate::market::AssetCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Warning,
    Danger,
}

/// Derived position metrics. Computed, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub total_supplied_value: f64,
    pub total_borrowed_value: f64,
    pub borrow_limit: f64,
    pub borrow_limit_used_pct: f64,
    /// `f64::INFINITY` when there is no debt; callers special-case display.
    pub health_factor: f64,
    /// Only meaningful with exactly one collateral asset and outstanding debt.
    pub liquidation_price: Option<f64>,
    pub risk_level: RiskLevel,
}

/// Clamp negative/NaN inputs to zero before any computation.
fn sane(v: f64) -> f64 {
    if v.is_finite() && v > 0.0_f64 {
        v
    } else {
        0.0_f64
    }
}

/// Unweighted USD value of a position map: Σ amount × price.
pub fn total_value(positions: &BTreeMap<String, Position>, catalog: &AssetCatalog) -> f64 {
    positions
        .iter()
        .filter_map(|(symbol, p)| {
            catalog
                .get(symbol)
                .map(|a| sane(p.amount) * sane(a.price))
        })
        .sum()
}

/// Risk-weighted collateral value: Σ amount × price × `collateral_factor`.
pub fn borrow_limit(supplied: &BTreeMap<String, Position>, catalog: &AssetCatalog) -> f64 {
    supplied
        .iter()
        .filter_map(|(symbol, p)| {
            catalog.get(symbol).map(|a| {
                sane(p.amount) * sane(a.price) * a.collateral_factor.clamp(0.0_f64, 1.0_f64)
            })
        })
        .sum()
}

fn risk_level(health_factor: f64, risk: &RiskConfig) -> RiskLevel {
    if health_factor < risk.danger_below {
        RiskLevel::Danger
    } else if health_factor < risk.warn_below {
        RiskLevel::Warning
    } else {
        RiskLevel::Safe
    }
}

/// Compute the full metrics record from a position snapshot.
///
/// Pure and infallible: inputs are sanitized, unknown symbols contribute
/// nothing, and a debt-free account reports an infinite health factor.
pub fn compute_metrics(
    supplied: &BTreeMap<String, Position>,
    borrowed: &BTreeMap<String, Position>,
    catalog: &AssetCatalog,
    risk: &RiskConfig,
) -> Metrics {
    let total_supplied_value = total_value(supplied, catalog);
    let total_borrowed_value = total_value(borrowed, catalog);
    let limit = borrow_limit(supplied, catalog);

    let borrow_limit_used_pct = if limit > 0.0_f64 {
        total_borrowed_value / limit * 100.0_f64
    } else {
        0.0_f64
    };

    let health_factor = if total_borrowed_value > 0.0_f64 {
        limit / total_borrowed_value
    } else {
        f64::INFINITY
    };

    let mut collaterals = supplied
        .iter()
        .filter(|(_, p)| sane(p.amount) > 0.0_f64);
    let liquidation_price = match (collaterals.next(), collaterals.next()) {
        (Some((_, only)), None) if total_borrowed_value > 0.0_f64 => {
            Some(total_borrowed_value / (sane(only.amount) * risk.liquidation_factor))
        }
        _ => None,
    };

    Metrics {
        total_supplied_value,
        total_borrowed_value,
        borrow_limit: limit,
        borrow_limit_used_pct,
        health_factor,
        liquidation_price,
        risk_level: risk_level(health_factor, risk),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::market::Asset;

    fn usdc_catalog() -> AssetCatalog {
        AssetCatalog::from_assets(&[Asset {
            symbol: "USDC".to_owned(),
            name: "USD Coin".to_owned(),
            price: 1.0_f64,
            supply_rate: 0.0312_f64,
            borrow_rate: 0.045_f64,
            collateral_factor: 0.8_f64,
            stable: true,
        }])
    }

    fn pos(symbol: &str, amount: f64, rate: f64) -> (String, Position) {
        (
            symbol.to_owned(),
            Position {
                symbol: symbol.to_owned(),
                amount,
                interest_rate: rate,
            },
        )
    }

    #[test]
    fn supply_only_metrics() {
        let risk = SimConfig::default().risk;
        let supplied: BTreeMap<_, _> = [pos("USDC", 5_000.0_f64, 0.0312_f64)].into();
        let borrowed = BTreeMap::new();
        let m = compute_metrics(&supplied, &borrowed, &usdc_catalog(), &risk);
        assert!((m.total_supplied_value - 5_000.0_f64).abs() < 1e-9_f64);
        assert!((m.borrow_limit - 4_000.0_f64).abs() < 1e-9_f64);
        assert!(m.health_factor.is_infinite(), "no debt must report infinity");
        assert_eq!(m.risk_level, RiskLevel::Safe);
        assert!(m.liquidation_price.is_none(), "no debt, no liquidation price");
    }

    #[test]
    fn borrow_at_limit_is_health_one() {
        let risk = SimConfig::default().risk;
        let supplied: BTreeMap<_, _> = [pos("USDC", 5_000.0_f64, 0.0312_f64)].into();
        let borrowed: BTreeMap<_, _> = [pos("USDC", 4_000.0_f64, 0.045_f64)].into();
        let m = compute_metrics(&supplied, &borrowed, &usdc_catalog(), &risk);
        assert!((m.health_factor - 1.0_f64).abs() < 1e-9_f64);
        assert!((m.borrow_limit_used_pct - 100.0_f64).abs() < 1e-9_f64);
        assert_eq!(m.risk_level, RiskLevel::Danger);
        // Single-collateral liquidation price: 4000 / (5000 × 0.80) = 1.0.
        let lp = m.liquidation_price;
        assert!(lp.is_some(), "single collateral with debt has a liquidation price");
        if let Some(v) = lp {
            assert!((v - 1.0_f64).abs() < 1e-9_f64, "liquidation price: {v}");
        }
    }

    #[test]
    fn risk_tiers_match_thresholds() {
        let risk = SimConfig::default().risk;
        let catalog = usdc_catalog();
        let supplied: BTreeMap<_, _> = [pos("USDC", 10_000.0_f64, 0.03_f64)].into();
        // borrow limit = 8000. Pick debts that land in each tier.
        for (debt, expected) in [
            (3_000.0_f64, RiskLevel::Safe),    // health ≈ 2.67
            (4_000.0_f64, RiskLevel::Safe),    // health = 2.0 exactly
            (4_100.0_f64, RiskLevel::Warning), // health ≈ 1.95
            (5_400.0_f64, RiskLevel::Danger),  // health ≈ 1.48
        ] {
            let borrowed: BTreeMap<_, _> = [pos("USDC", debt, 0.045_f64)].into();
            let m = compute_metrics(&supplied, &borrowed, &catalog, &risk);
            assert_eq!(m.risk_level, expected, "debt={debt} health={}", m.health_factor);
        }
    }

    #[test]
    fn garbage_amounts_clamp_to_zero() {
        let risk = SimConfig::default().risk;
        let supplied: BTreeMap<_, _> = [
            pos("USDC", f64::NAN, 0.03_f64),
        ]
        .into();
        let borrowed: BTreeMap<_, _> = [pos("USDC", -5.0_f64, 0.045_f64)].into();
        let m = compute_metrics(&supplied, &borrowed, &usdc_catalog(), &risk);
        assert!((m.total_supplied_value).abs() < f64::EPSILON);
        assert!((m.total_borrowed_value).abs() < f64::EPSILON);
        assert!((m.borrow_limit_used_pct).abs() < f64::EPSILON, "zero limit must report 0%");
        assert!(m.health_factor.is_infinite());
    }

    #[test]
    fn unknown_symbols_contribute_nothing() {
        let risk = SimConfig::default().risk;
        let supplied: BTreeMap<_, _> = [
            pos("USDC", 1_000.0_f64, 0.03_f64),
            pos("GHOST", 1_000.0_f64, 0.03_f64),
        ]
        .into();
        let borrowed = BTreeMap::new();
        let m = compute_metrics(&supplied, &borrowed, &usdc_catalog(), &risk);
        assert!((m.total_supplied_value - 1_000.0_f64).abs() < 1e-9_f64);
    }
}
