use eyre::Context as _;
use serde_json::json;
use std::io::Write as _;

use crate::{paths::AppPaths, service::LedgerService};

/// Quick self-diagnostic (safe to paste; contains no balances).
pub fn run(json_out: bool) -> eyre::Result<()> {
    let paths = AppPaths::discover()?;
    paths.ensure_private_dirs()?;

    let svc = LedgerService::open(&paths)?;
    let users = svc.list_users()?;
    let catalog_assets = svc.config().seed.assets.len();

    let report = json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "paths": {
            "config_dir": paths.config_dir,
            "data_dir": paths.data_dir,
            "log_file": paths.log_file,
        },
        "config": {
            "catalog_assets": catalog_assets,
            "liquidation_factor": svc.config().risk.liquidation_factor,
            "tick_seconds": svc.config().accrual.tick_seconds,
        },
        "users": users.len(),
    });

    let mut stdout = std::io::stdout().lock();
    if json_out {
        writeln!(stdout, "{report}").context("write doctor report")?;
    } else {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&report)?)
            .context("write doctor report")?;
    }
    Ok(())
}
