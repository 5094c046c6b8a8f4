//! Session-scoped orchestration around the ledger core.
//!
//! Every mutation runs under the store's exclusive lock: load snapshot, apply
//! the ledger operation, persist, append an activity entry. Expected ledger
//! failures come back as `Ok(Err(LedgerError))`; only infrastructure problems
//! (I/O, serialization) surface as `eyre` errors.

use eyre::Context as _;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

use crate::{
    activity::utc_now_iso,
    analytics::{self, Metrics},
    config::SimConfig,
    errors::LedgerError,
    ledger::{Ledger, Position, Transaction, TxKind},
    market::AssetCatalog,
    paths::AppPaths,
    store::{ConfigStore, LedgerStore, UserSnapshot},
};

#[derive(Debug, Clone, Serialize)]
pub struct PositionsView {
    pub supplied: Vec<Position>,
    pub borrowed: Vec<Position>,
    pub wallet: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpOutcome {
    pub op: &'static str,
    pub asset: Option<String>,
    /// The effective amount (repay reports the clamped amount).
    pub amount: Option<f64>,
    pub metrics: Metrics,
}

pub struct LedgerService {
    cfg: SimConfig,
    store: LedgerStore,
}

/// JSON shape for a metrics record. `health_factor` has no JSON literal when
/// infinite, so it is emitted as null plus a display string.
pub fn metrics_json(m: &Metrics) -> Value {
    let health: Value = if m.health_factor.is_finite() {
        json!(m.health_factor)
    } else {
        Value::Null
    };
    let health_display = if m.health_factor.is_finite() {
        format!("{:.2}", m.health_factor)
    } else {
        "∞".to_owned()
    };
    json!({
        "total_supplied_value": m.total_supplied_value,
        "total_borrowed_value": m.total_borrowed_value,
        "borrow_limit": m.borrow_limit,
        "borrow_limit_used_pct": m.borrow_limit_used_pct,
        "health_factor": health,
        "health_factor_display": health_display,
        "liquidation_price": m.liquidation_price,
        "risk_level": m.risk_level,
    })
}

impl LedgerService {
    pub fn open(paths: &AppPaths) -> eyre::Result<Self> {
        paths.ensure_private_dirs()?;
        let cfg = ConfigStore::new(paths).load_or_init_default()?;
        cfg.validate().context("invalid config")?;
        Ok(Self {
            cfg,
            store: LedgerStore::new(paths.clone()),
        })
    }

    pub const fn config(&self) -> &SimConfig {
        &self.cfg
    }

    fn seeded_snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            ledger: Ledger::seeded(&self.cfg.seed),
            catalog: AssetCatalog::from_assets(&self.cfg.seed.assets),
        }
    }

    fn load_or_seed(&self, user: &str) -> eyre::Result<UserSnapshot> {
        Ok(self
            .store
            .load_user(user)?
            .unwrap_or_else(|| self.seeded_snapshot()))
    }

    fn compute(&self, snap: &UserSnapshot) -> Metrics {
        analytics::compute_metrics(
            &snap.ledger.supplied,
            &snap.ledger.borrowed,
            &snap.catalog,
            &self.cfg.risk,
        )
    }

    /// Take the store's exclusive lock, surfacing contention as the expected
    /// `StoreBusy` rejection rather than an infrastructure error.
    fn lock_or_busy(&self) -> eyre::Result<Result<std::fs::File, LedgerError>> {
        match self.store.acquire_write_lock() {
            Ok(l) => Ok(Ok(l)),
            Err(e) => {
                if matches!(e.downcast_ref::<LedgerError>(), Some(LedgerError::StoreBusy)) {
                    Ok(Err(LedgerError::StoreBusy))
                } else {
                    Err(e)
                }
            }
        }
    }

    // ── Read API ──────────────────────────────────────────────────────

    pub fn positions(&self, user: &str) -> eyre::Result<PositionsView> {
        let snap = self.load_or_seed(user)?;
        Ok(PositionsView {
            supplied: snap.ledger.supplied.values().cloned().collect(),
            borrowed: snap.ledger.borrowed.values().cloned().collect(),
            wallet: snap.ledger.wallet.clone(),
        })
    }

    pub fn metrics(&self, user: &str) -> eyre::Result<Metrics> {
        let snap = self.load_or_seed(user)?;
        Ok(self.compute(&snap))
    }

    /// Transaction log, newest first.
    pub fn history(
        &self,
        user: &str,
        limit: usize,
        kind: Option<TxKind>,
    ) -> eyre::Result<Vec<Transaction>> {
        let snap = self.load_or_seed(user)?;
        Ok(snap
            .ledger
            .transactions
            .iter()
            .filter(|t| kind.is_none_or(|k| t.kind == k))
            .take(limit)
            .cloned()
            .collect())
    }

    // ── Write API ─────────────────────────────────────────────────────

    fn apply_op(
        &self,
        user: &str,
        op: &'static str,
        asset: Option<&str>,
        f: impl FnOnce(&mut UserSnapshot, &SimConfig) -> Result<Option<f64>, LedgerError>,
    ) -> eyre::Result<Result<OpOutcome, LedgerError>> {
        let lock = match self.lock_or_busy()? {
            Ok(l) => l,
            Err(le) => return Ok(Err(le)),
        };

        let mut snap = self.load_or_seed(user)?;
        let applied = f(&mut snap, &self.cfg);

        let result = match applied {
            Ok(amount) => {
                // Commit point: the mutation stands once the snapshot write returns.
                self.store.save_user(user, &snap)?;
                let _activity = self.store.append_activity(&json!({
                    "ts": utc_now_iso(), "user": user, "op": op,
                    "asset": asset, "amount": amount,
                    "result": "committed", "error_code": null,
                }));
                Ok(OpOutcome {
                    op,
                    asset: asset.map(ToOwned::to_owned),
                    amount,
                    metrics: self.compute(&snap),
                })
            }
            Err(le) => {
                let _activity = self.store.append_activity(&json!({
                    "ts": utc_now_iso(), "user": user, "op": op,
                    "asset": asset, "amount": null,
                    "result": "rejected", "error_code": le.code(),
                }));
                Err(le)
            }
        };

        LedgerStore::release_lock(lock)?;
        Ok(result)
    }

    pub fn supply(
        &self,
        user: &str,
        symbol: &str,
        amount: f64,
    ) -> eyre::Result<Result<OpOutcome, LedgerError>> {
        self.apply_op(user, "supply", Some(symbol), |snap, _| {
            snap.ledger.supply(&snap.catalog, symbol, amount)?;
            Ok(Some(amount))
        })
    }

    pub fn borrow(
        &self,
        user: &str,
        symbol: &str,
        amount: f64,
    ) -> eyre::Result<Result<OpOutcome, LedgerError>> {
        self.apply_op(user, "borrow", Some(symbol), |snap, _| {
            snap.ledger.borrow(&snap.catalog, symbol, amount)?;
            Ok(Some(amount))
        })
    }

    pub fn withdraw(
        &self,
        user: &str,
        symbol: &str,
        amount: f64,
    ) -> eyre::Result<Result<OpOutcome, LedgerError>> {
        self.apply_op(user, "withdraw", Some(symbol), |snap, _| {
            snap.ledger.withdraw(&snap.catalog, symbol, amount)?;
            Ok(Some(amount))
        })
    }

    pub fn repay(
        &self,
        user: &str,
        symbol: &str,
        amount: f64,
    ) -> eyre::Result<Result<OpOutcome, LedgerError>> {
        self.apply_op(user, "repay", Some(symbol), |snap, _| {
            let repaid = snap.ledger.repay(&snap.catalog, symbol, amount)?;
            Ok(Some(repaid))
        })
    }

    pub fn reset_all(&self, user: &str) -> eyre::Result<Result<OpOutcome, LedgerError>> {
        self.apply_op(user, "reset", None, |snap, cfg| {
            snap.ledger.reset(&cfg.seed);
            snap.catalog = AssetCatalog::from_assets(&cfg.seed.assets);
            Ok(None)
        })
    }

    pub fn refill_wallet(&self, user: &str) -> eyre::Result<Result<OpOutcome, LedgerError>> {
        self.apply_op(user, "refill", None, |snap, cfg| {
            snap.ledger.refill_wallet(&cfg.seed);
            Ok(None)
        })
    }

    // ── Simulation ────────────────────────────────────────────────────

    /// Advance every stored user by `ticks`: one market step then one accrual
    /// period per tick, on the same lock as user operations.
    pub fn tick(&self, ticks: u32) -> eyre::Result<Result<TickSummary, LedgerError>> {
        let lock = match self.lock_or_busy()? {
            Ok(l) => l,
            Err(le) => return Ok(Err(le)),
        };

        let users = self.store.list_users()?;
        let mut rng = rand::rng();
        for user in &users {
            let Some(mut snap) = self.store.load_user(user)? else {
                continue;
            };
            for _ in 0..ticks {
                snap.catalog.step(&self.cfg.market, &mut rng);
                snap.ledger
                    .accrue(&snap.catalog, self.cfg.accrual.periods_per_year, 1);
            }
            self.store.save_user(user, &snap)?;
        }

        LedgerStore::release_lock(lock)?;
        info!(users = users.len(), ticks, "simulation advanced");
        Ok(Ok(TickSummary {
            users: users.len(),
            ticks,
        }))
    }

    /// Overwrite every user's catalog prices from the live feed. Best-effort.
    pub async fn refresh_prices(&self) -> eyre::Result<Result<RefreshSummary, LedgerError>> {
        let lock = match self.lock_or_busy()? {
            Ok(l) => l,
            Err(le) => return Ok(Err(le)),
        };

        let users = self.store.list_users()?;
        let mut updated = 0_usize;
        for user in &users {
            let Some(mut snap) = self.store.load_user(user)? else {
                continue;
            };
            updated += crate::price::refresh_catalog_prices(&self.cfg, &mut snap.catalog).await;
            self.store.save_user(user, &snap)?;
        }

        LedgerStore::release_lock(lock)?;
        Ok(Ok(RefreshSummary {
            users: users.len(),
            prices_updated: updated,
        }))
    }

    pub fn read_activity(&self, limit: usize) -> eyre::Result<Vec<Value>> {
        self.store.read_activity(limit)
    }

    pub fn list_users(&self) -> eyre::Result<Vec<String>> {
        self.store.list_users()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TickSummary {
    pub users: usize,
    pub ticks: u32,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RefreshSummary {
    pub users: usize,
    pub prices_updated: usize,
}
