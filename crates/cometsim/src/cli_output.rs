//! Centralised helpers for user-facing CLI output written to stderr.

use std::io::Write as _;

fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

/// Print the daemon startup banner to stderr (human-operator info only).
pub fn print_run_banner(version: &str, interval_seconds: u64, live_prices: bool) {
    let feed = if live_prices {
        "live (Binance, falls back to simulated)"
    } else {
        "simulated"
    };
    stderr_writeln(&format!(
        "Cometsim daemon\n===============\nVersion  : v{version}\nTick     : every {interval_seconds}s\nPrices   : {feed}\n\nTip: `cometsim doctor` checks the local state if something looks off."
    ));
}
