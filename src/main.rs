// =============================================================================
// Delta Trend Screener: Main Entry Point
// =============================================================================
//
// Classifies every Delta Exchange perpetual contract on several timeframes by
// comparing its 20-period and 200-period simple moving averages, keeps the
// latest report fresh on a timer, and serves it over REST, CSV and WebSocket.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod delta;
mod export;
mod indicators;
mod market_data;
mod runtime_config;
mod screener;
mod trend;
mod types;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::auth::{AdminToken, ADMIN_TOKEN_ENV};
use crate::app_state::AppState;
use crate::delta::DeltaClient;
use crate::market_data::CandleCache;
use crate::runtime_config::{ScreenerConfig, CONFIG_PATH};
use crate::screener::Screener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Delta Trend Screener: Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = ScreenerConfig::load_or_init(CONFIG_PATH);

    if let Err(e) = config.apply_env_overrides() {
        warn!(error = %format!("{e:#}"), "Ignoring invalid environment override");
    }
    config.validate().context("invalid screener configuration")?;

    info!(
        api = %config.api_base_url,
        symbols = ?config.symbols,
        timeframes = ?config.timeframes,
        short = config.trend.short_window,
        long = config.trend.long_window,
        "Screener configured"
    );

    // ── 2. Exchange client, cache, shared state ──────────────────────────
    let client = Arc::new(DeltaClient::new(
        config.api_base_url.clone(),
        config.request_timeout(),
    )?);
    let cache = Arc::new(CandleCache::new(config.cache_max_entries, config.cache_ttl()));
    let screener = Arc::new(Screener::new(client, cache));

    let bind_addr = config.bind_addr.clone();
    let refresh_interval = config.refresh_interval();
    let admin_token = AdminToken::from_env();
    if !admin_token.is_configured() {
        warn!("{ADMIN_TOKEN_ENV} is not set; refresh, cache and WebSocket routes are locked");
    }
    let state = Arc::new(AppState::new(config, screener, admin_token));

    // ── 3. Start the API server ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 4. Refresh loop ──────────────────────────────────────────────────
    let refresh_state = state.clone();
    tokio::spawn(async move {
        let Some(period) = refresh_interval else {
            info!("Auto-refresh disabled; running a single initial scan");
            refresh_state.refresh().await;
            return;
        };

        info!(every_secs = period.as_secs(), "Refresh loop starting");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let report = refresh_state.refresh().await;
            info!(
                report_id = %report.id,
                rows = report.rows.len(),
                warnings = report.warnings.len(),
                "Report published"
            );
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping gracefully");

    info!("Delta Trend Screener shut down complete.");
    Ok(())
}
