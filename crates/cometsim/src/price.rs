//! Optional live price feed. The simulated market walk is the default; this
//! module only overwrites catalog prices when the operator asks for it, and
//! failures degrade back to the walk.

use eyre::Context as _;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::config::SimConfig;
use crate::market::AssetCatalog;

fn allow_insecure_http() -> bool {
    std::env::var("COMETSIM_ALLOW_INSECURE_HTTP")
        .ok()
        .is_some_and(|v| {
            matches!(
                v.as_str(),
                "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON"
            )
        })
}

fn is_loopback_http(url: &str) -> bool {
    fn host_prefix_ok(s: &str, prefix: &str) -> bool {
        if !s.starts_with(prefix) {
            return false;
        }
        matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
    }
    let u = url.trim();
    host_prefix_ok(u, "http://127.0.0.1")
        || host_prefix_ok(u, "http://localhost")
        || host_prefix_ok(u, "http://[::1]")
}

#[derive(Debug, Deserialize)]
struct BinanceTickerPrice {
    price: String,
}

/// USD price for one whole token via the keyless Binance ticker endpoint.
///
/// Stablecoins short-circuit to 1.0 without a network call.
pub async fn binance_price_usd(cfg: &SimConfig, symbol: &str) -> eyre::Result<f64> {
    if symbol.eq_ignore_ascii_case("USD")
        || symbol.eq_ignore_ascii_case("USDT")
        || symbol.eq_ignore_ascii_case("USDC")
    {
        return Ok(1.0_f64);
    }

    let base = cfg.http.binance_base_url.trim();
    if !base.starts_with("https://") && !is_loopback_http(base) && !allow_insecure_http() {
        eyre::bail!(
            "binance_base_url must use https (or loopback); set COMETSIM_ALLOW_INSECURE_HTTP=1 to override"
        );
    }

    // Binance quotes wrapped majors without the W prefix.
    let pair_symbol = match symbol {
        "WETH" => "ETH",
        "WBTC" => "BTC",
        other => other,
    };
    let url = format!(
        "{}/api/v3/ticker/price?symbol={}USDT",
        base.trim_end_matches('/'),
        pair_symbol.to_ascii_uppercase()
    );

    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("build http client")?;
    let resp = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?
        .error_for_status()
        .with_context(|| format!("status for {url}"))?;
    let ticker: BinanceTickerPrice = resp.json().await.context("parse ticker json")?;
    let price: f64 = ticker.price.trim().parse().context("parse ticker price")?;
    if !price.is_finite() || price <= 0.0_f64 {
        eyre::bail!("non-positive price for {symbol}: {price}");
    }
    Ok(price)
}

/// Best-effort refresh of every catalog price from the live feed.
///
/// Returns the number of prices updated. A failed symbol keeps its simulated
/// price and is logged, never fatal.
pub async fn refresh_catalog_prices(cfg: &SimConfig, catalog: &mut AssetCatalog) -> usize {
    let symbols: Vec<String> = catalog.assets().map(|a| a.symbol.clone()).collect();
    let mut updated = 0_usize;
    for symbol in symbols {
        match binance_price_usd(cfg, &symbol).await {
            Ok(price) => {
                if catalog.set_price(&symbol, price) {
                    updated += 1;
                }
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %format!("{e:#}"), "live price fetch failed; keeping simulated price");
            }
        }
    }
    updated
}
