use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::market::Asset;

/// Risk constants applied uniformly by the analytics module.
///
/// One liquidation factor and one threshold table for the whole tool; view
/// layers must not carry their own copies of these numbers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Discount applied to collateral value when computing liquidation risk.
    pub liquidation_factor: f64,
    /// Health factor below this is a warning.
    pub warn_below: f64,
    /// Health factor below this is danger.
    pub danger_below: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            liquidation_factor: 0.80_f64,
            warn_below: 2.0_f64,
            danger_below: 1.5_f64,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AccrualConfig {
    /// Compounding periods per year. 365×24×12 matches five-minute ticks.
    pub periods_per_year: u32,
    /// Daemon cadence between ticks.
    pub tick_seconds: u64,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            periods_per_year: 365 * 24 * 12,
            tick_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Max per-tick price drift for non-stable assets (fraction, ±).
    pub price_walk_pct: f64,
    /// Max per-tick rate drift (fraction, ±; 0.002 = 0.2 percentage points).
    pub rate_walk_pp: f64,
    pub supply_rate_min: f64,
    pub supply_rate_max: f64,
    /// Borrow must exceed supply by at least this much after every tick.
    pub min_rate_spread: f64,
    pub borrow_rate_max: f64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            price_walk_pct: 0.02_f64,
            rate_walk_pp: 0.002_f64,
            supply_rate_min: 0.005_f64,
            supply_rate_max: 0.10_f64,
            min_rate_spread: 0.005_f64,
            borrow_rate_max: 0.15_f64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Binance public API base URL (keyless). Used for live USD prices.
    pub binance_base_url: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            binance_base_url: "https://api.binance.com".into(),
        }
    }
}

/// Fixed seed state: the asset catalog and the wallet every fresh or reset
/// ledger starts from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// The stablecoin the refill transaction is recorded against.
    pub base_asset: String,
    pub assets: Vec<Asset>,
    pub wallet: BTreeMap<String, f64>,
}

fn asset(
    symbol: &str,
    name: &str,
    price: f64,
    supply_rate: f64,
    borrow_rate: f64,
    collateral_factor: f64,
    stable: bool,
) -> Asset {
    Asset {
        symbol: symbol.to_owned(),
        name: name.to_owned(),
        price,
        supply_rate,
        borrow_rate,
        collateral_factor,
        stable,
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            base_asset: "USDC".into(),
            assets: vec![
                asset("USDC", "USD Coin", 1.0_f64, 0.0312_f64, 0.0445_f64, 0.80_f64, true),
                asset("WETH", "Wrapped Ether", 2_450.0_f64, 0.0210_f64, 0.0310_f64, 0.75_f64, false),
                asset("WBTC", "Wrapped Bitcoin", 43_250.0_f64, 0.0080_f64, 0.0160_f64, 0.70_f64, false),
                asset("COMP", "Compound", 58.5_f64, 0.0120_f64, 0.0270_f64, 0.65_f64, false),
            ],
            wallet: [
                ("USDC".to_owned(), 10_000.0_f64),
                ("WETH".to_owned(), 5.0_f64),
                ("WBTC".to_owned(), 0.25_f64),
                ("COMP".to_owned(), 100.0_f64),
            ]
            .into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimConfig {
    pub risk: RiskConfig,
    pub accrual: AccrualConfig,
    pub market: MarketConfig,
    pub http: HttpConfig,
    pub seed: SeedConfig,
}

impl SimConfig {
    /// Reject configs no ledger could run on. A malformed catalog is an
    /// operator error, not an expected ledger failure.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.seed.assets.is_empty() {
            eyre::bail!("seed catalog is empty");
        }
        if self.accrual.periods_per_year == 0 {
            eyre::bail!("accrual.periods_per_year must be positive");
        }
        for a in &self.seed.assets {
            if a.symbol.trim().is_empty() {
                eyre::bail!("seed asset with empty symbol");
            }
            if !(0.0_f64..=1.0_f64).contains(&a.collateral_factor) {
                eyre::bail!("{}: collateral_factor must be in [0,1]", a.symbol);
            }
            if !a.price.is_finite() || a.price < 0.0_f64 {
                eyre::bail!("{}: price must be a non-negative number", a.symbol);
            }
            if a.supply_rate < 0.0_f64 || a.borrow_rate < 0.0_f64 {
                eyre::bail!("{}: rates must be non-negative", a.symbol);
            }
        }
        if !self.seed.assets.iter().any(|a| a.symbol == self.seed.base_asset) {
            eyre::bail!("base asset {} missing from seed catalog", self.seed.base_asset);
        }
        if !self.seed.wallet.contains_key(&self.seed.base_asset) {
            eyre::bail!("base asset {} missing from seed wallet", self.seed.base_asset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![expect(
        clippy::float_arithmetic,
        reason = "test assertions compare float deltas"
    )]

    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = SimConfig::default();
        let r = cfg.validate();
        assert!(r.is_ok(), "default config invalid: {r:?}");
    }

    #[test]
    fn default_spread_is_respected_by_seeds() {
        let cfg = SimConfig::default();
        for a in &cfg.seed.assets {
            assert!(
                a.borrow_rate - a.supply_rate >= cfg.market.min_rate_spread - 1e-12_f64,
                "{}: seeded spread below minimum",
                a.symbol
            );
        }
    }

    #[test]
    fn toml_round_trip() -> eyre::Result<()> {
        let cfg = SimConfig::default();
        let s = toml::to_string_pretty(&cfg)?;
        let back: SimConfig = toml::from_str(&s)?;
        assert!((back.risk.liquidation_factor - cfg.risk.liquidation_factor).abs() < f64::EPSILON);
        assert_eq!(back.seed.assets.len(), cfg.seed.assets.len());
        assert_eq!(back.accrual.periods_per_year, cfg.accrual.periods_per_year);
        Ok(())
    }

    #[test]
    fn bad_collateral_factor_is_rejected() {
        let mut cfg = SimConfig::default();
        if let Some(a) = cfg.seed.assets.first_mut() {
            a.collateral_factor = 1.5_f64;
        }
        assert!(cfg.validate().is_err(), "collateral_factor 1.5 must not validate");
    }
}
