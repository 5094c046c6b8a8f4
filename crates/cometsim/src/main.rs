use clap::{Parser, Subcommand, ValueEnum};
use eyre::Context as _;
use serde_json::{json, Value};
use std::io::Write as _;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::prelude::*;

mod activity;
mod analytics;
mod cli_output;
mod config;
mod doctor;
mod errors;
mod fsutil;
mod ledger;
mod market;
mod paths;
mod price;
mod service;
mod store;

use errors::{ApiError, LedgerError};
use ledger::TxKind;
use service::{metrics_json, LedgerService, OpOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliTxKind {
    Supply,
    Borrow,
    Withdraw,
    Repay,
}

impl From<CliTxKind> for TxKind {
    fn from(v: CliTxKind) -> Self {
        match v {
            CliTxKind::Supply => Self::Supply,
            CliTxKind::Borrow => Self::Borrow,
            CliTxKind::Withdraw => Self::Withdraw,
            CliTxKind::Repay => Self::Repay,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "cometsim", version)]
struct Cli {
    /// Ledger owner. Each user has an isolated snapshot.
    #[arg(long, global = true, default_value = "default")]
    user: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Move wallet funds into a supplied (collateral) position.
    Supply {
        #[arg(long)]
        asset: String,
        #[arg(long)]
        amount: f64,
    },

    /// Borrow against supplied collateral, up to the borrow limit.
    Borrow {
        #[arg(long)]
        asset: String,
        #[arg(long)]
        amount: f64,
    },

    /// Withdraw supplied collateral back to the wallet.
    ///
    /// Rejected entirely if it would leave outstanding debt above the reduced
    /// borrow limit; there is no partial withdrawal.
    Withdraw {
        #[arg(long)]
        asset: String,
        #[arg(long)]
        amount: f64,
    },

    /// Repay outstanding debt. Over-repayment clamps to the amount owed.
    Repay {
        #[arg(long)]
        asset: String,
        #[arg(long)]
        amount: f64,
    },

    /// Print supplied/borrowed positions and wallet balances.
    Positions,

    /// Print the derived risk metrics (borrow limit, health factor, ...).
    Metrics,

    /// Print the transaction log, newest first.
    History {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Only show transactions of this kind.
        #[arg(long, value_enum)]
        kind: Option<CliTxKind>,
    },

    /// Clear positions, transactions, and wallet back to the seed state.
    Reset,

    /// Top the wallet back up to the seed balances, keeping positions.
    Refill,

    /// Advance the simulation: one market step plus one accrual period per tick,
    /// for every stored user.
    Tick {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Run the tick scheduler until interrupted.
    Run {
        /// Seconds between ticks. Defaults to the configured cadence.
        #[arg(long)]
        interval_seconds: Option<u64>,

        /// Also refresh catalog prices from the live feed each tick.
        #[arg(long, default_value_t = false)]
        live_prices: bool,
    },

    /// One-shot refresh of catalog prices from the live feed.
    RefreshPrices,

    /// Print recent activity-log entries, newest first.
    Activity {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Print resolved paths (useful for debugging).
    Paths,

    /// Print a quick self-diagnostic report (safe to paste; contains no balances).
    Doctor {
        /// Emit JSON to stdout (machine-readable).
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_logging(paths: &paths::AppPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("cometsim.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn print_json(v: &Value) -> eyre::Result<()> {
    writeln!(std::io::stdout().lock(), "{v}").context("write output")?;
    Ok(())
}

/// Print a write-op result: updated metrics on success, a structured error
/// object and a failing exit code on an expected rejection.
fn finish_write(outcome: Result<OpOutcome, LedgerError>) -> eyre::Result<ExitCode> {
    match outcome {
        Ok(o) => {
            print_json(&json!({
                "ok": true,
                "op": o.op,
                "asset": o.asset,
                "amount": o.amount,
                "metrics": metrics_json(&o.metrics),
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(le) => print_expected_error(le),
    }
}

/// Print a structured error object for an expected rejection and fail the exit.
fn print_expected_error(le: LedgerError) -> eyre::Result<ExitCode> {
    let api = ApiError::from(le);
    print_json(&json!({ "ok": false, "error": api }))?;
    Ok(ExitCode::FAILURE)
}

/// Print a simulation summary (tick, price refresh) with `"ok": true` folded in.
fn finish_summary<T: serde::Serialize>(outcome: Result<T, LedgerError>) -> eyre::Result<ExitCode> {
    match outcome {
        Ok(s) => {
            let mut v = serde_json::to_value(&s).context("serialize summary")?;
            if let Value::Object(m) = &mut v {
                m.insert("ok".to_owned(), Value::Bool(true));
            }
            print_json(&v)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(le) => print_expected_error(le),
    }
}

async fn run_daemon(
    svc: &LedgerService,
    interval_seconds: Option<u64>,
    live_prices: bool,
) -> eyre::Result<()> {
    let interval = interval_seconds
        .unwrap_or(svc.config().accrual.tick_seconds)
        .max(1);
    cli_output::print_run_banner(env!("CARGO_PKG_VERSION"), interval, live_prices);

    let mut timer = tokio::time::interval(Duration::from_secs(interval));
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first interval tick fires immediately; skip it so the cadence starts
    // one period from launch.
    timer.tick().await;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                if live_prices {
                    match svc.refresh_prices().await {
                        Ok(Ok(s)) => tracing::debug!(prices_updated = s.prices_updated, "prices refreshed"),
                        Ok(Err(le)) => tracing::warn!(code = le.code(), "price refresh skipped"),
                        Err(e) => return Err(e.wrap_err("price refresh failed")),
                    }
                }
                match svc.tick(1) {
                    Ok(Ok(_)) => {}
                    Ok(Err(le)) => tracing::warn!(code = le.code(), "tick skipped"),
                    Err(e) => return Err(e.wrap_err("tick failed")),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted; shutting down");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let app_paths = paths::AppPaths::discover()?;
    std::fs::create_dir_all(&app_paths.data_dir).context("create data dir")?;
    let _log_guard = init_logging(&app_paths);

    match cli.cmd {
        Command::Supply { asset, amount } => {
            let svc = LedgerService::open(&app_paths)?;
            finish_write(svc.supply(&cli.user, &asset, amount)?)
        }
        Command::Borrow { asset, amount } => {
            let svc = LedgerService::open(&app_paths)?;
            finish_write(svc.borrow(&cli.user, &asset, amount)?)
        }
        Command::Withdraw { asset, amount } => {
            let svc = LedgerService::open(&app_paths)?;
            finish_write(svc.withdraw(&cli.user, &asset, amount)?)
        }
        Command::Repay { asset, amount } => {
            let svc = LedgerService::open(&app_paths)?;
            finish_write(svc.repay(&cli.user, &asset, amount)?)
        }
        Command::Reset => {
            let svc = LedgerService::open(&app_paths)?;
            finish_write(svc.reset_all(&cli.user)?)
        }
        Command::Refill => {
            let svc = LedgerService::open(&app_paths)?;
            finish_write(svc.refill_wallet(&cli.user)?)
        }
        Command::Positions => {
            let svc = LedgerService::open(&app_paths)?;
            let view = svc.positions(&cli.user)?;
            print_json(&json!({ "ok": true, "positions": view }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Metrics => {
            let svc = LedgerService::open(&app_paths)?;
            let m = svc.metrics(&cli.user)?;
            print_json(&json!({ "ok": true, "metrics": metrics_json(&m) }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::History { limit, kind } => {
            let svc = LedgerService::open(&app_paths)?;
            let txs = svc.history(&cli.user, limit, kind.map(Into::into))?;
            print_json(&json!({ "ok": true, "count": txs.len(), "transactions": txs }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Tick { count } => {
            let svc = LedgerService::open(&app_paths)?;
            finish_summary(svc.tick(count)?)
        }
        Command::Run {
            interval_seconds,
            live_prices,
        } => {
            let svc = LedgerService::open(&app_paths)?;
            run_daemon(&svc, interval_seconds, live_prices)
                .await
                .context("daemon failed")?;
            Ok(ExitCode::SUCCESS)
        }
        Command::RefreshPrices => {
            let svc = LedgerService::open(&app_paths)?;
            finish_summary(svc.refresh_prices().await?)
        }
        Command::Activity { limit } => {
            let svc = LedgerService::open(&app_paths)?;
            let entries = svc.read_activity(limit)?;
            print_json(&json!({ "ok": true, "count": entries.len(), "entries": entries }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Paths => {
            let s = serde_json::to_string(&json!({
                "config_dir": app_paths.config_dir,
                "data_dir": app_paths.data_dir,
                "log_file": app_paths.log_file,
            }))
            .context("serialize paths")?;
            writeln!(std::io::stdout().lock(), "{s}").context("write paths")?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Doctor { json } => {
            doctor::run(json).context("doctor failed")?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
