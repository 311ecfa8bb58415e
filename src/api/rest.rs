// =============================================================================
// REST API Endpoints (Axum 0.7)
// =============================================================================
//
// All endpoints live under `/api/v1/`. Screener queries are public; the
// endpoints that force exchange traffic or drop cached data require a valid
// Bearer token checked via the `AdminAccess` extractor.
//
// CORS is configured permissively so a browser dashboard can poll directly.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AdminAccess;
use crate::app_state::{AppState, StatusSnapshot};
use crate::export::{to_csv_string, CsvLayout};
use crate::market_data::{CandleKey, Timeframe};
use crate::runtime_config::parse_symbol_list;
use crate::types::TrendLabel;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/symbols", get(symbols))
        .route("/api/v1/scan", get(scan))
        .route("/api/v1/report", get(report))
        .route("/api/v1/report.csv", get(report_csv))
        .route("/api/v1/chart/:symbol/:timeframe", get(chart))
        .route("/api/v1/config", get(config))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/refresh", post(refresh))
        .route("/api/v1/cache/invalidate", post(invalidate_cache))
        // ── WebSocket (handled in the ws module, mounted here) ──────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    snapshot: StatusSnapshot,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        snapshot: state.build_status(),
    })
}

// =============================================================================
// Symbols (public)
// =============================================================================

/// Known symbols, running discovery first if none are known yet.
async fn current_symbols(state: &AppState) -> Vec<String> {
    let known = state.symbols.read().clone();
    if known.is_empty() {
        state.refresh_symbols().await
    } else {
        known
    }
}

async fn symbols(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let symbols = current_symbols(&state).await;
    Json(serde_json::json!({
        "count": symbols.len(),
        "symbols": symbols,
    }))
}

// =============================================================================
// Ad-hoc scan (public)
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct ScanQuery {
    /// Comma-separated symbols; defaults to the discovered universe.
    symbols: Option<String>,
    /// Comma-separated timeframes; defaults to the configured ones.
    timeframes: Option<String>,
    /// Comma-separated labels to keep; empty keeps all rows.
    labels: Option<String>,
}

fn parse_labels(raw: Option<&str>) -> Result<Vec<TrendLabel>, ApiError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<TrendLabel>())
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}

async fn scan(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScanQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.config_snapshot();

    let timeframes = match query.timeframes.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => Timeframe::parse_list(raw)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("{e:#}")))?,
        None => config.timeframes.clone(),
    };
    let labels = parse_labels(query.labels.as_deref())?;

    let symbols = match query.symbols.as_deref().map(parse_symbol_list) {
        Some(list) if !list.is_empty() => list,
        _ => current_symbols(&state).await,
    };

    let report = state
        .screener
        .scan(&symbols, &timeframes, &config, false)
        .await;
    Ok(Json(report.filtered(&labels)))
}

// =============================================================================
// Latest published report (public)
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct ReportQuery {
    labels: Option<String>,
}

async fn report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let labels = parse_labels(query.labels.as_deref())?;
    let latest = state
        .latest_report()
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "No report available yet"))?;
    Ok(Json(latest.filtered(&labels)))
}

#[derive(Debug, Default, Deserialize)]
struct CsvQuery {
    #[serde(default)]
    layout: CsvLayout,
}

async fn report_csv(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CsvQuery>,
) -> Result<Response, ApiError> {
    let latest = state
        .latest_report()
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "No report available yet"))?;
    let offset = state.config.read().display_utc_offset_minutes;

    let body = to_csv_string(&latest, query.layout, offset).map_err(|e| {
        warn!(error = %format!("{e:#}"), "CSV export failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
    })?;

    let mut resp = body.into_response();
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/csv; charset=utf-8"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"trend_report.csv\""),
    );
    if let Ok(value) = HeaderValue::from_str(&latest.generated_at.to_rfc3339()) {
        headers.insert("X-Generated-At", value);
    }
    Ok(resp)
}

// =============================================================================
// Chart series (public)
// =============================================================================

async fn chart(
    State(state): State<Arc<AppState>>,
    Path((symbol, timeframe)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let timeframe: Timeframe = timeframe
        .parse()
        .map_err(|e: anyhow::Error| api_error(StatusCode::BAD_REQUEST, format!("{e:#}")))?;
    let symbol = symbol.trim().to_uppercase();
    let config = state.config_snapshot();

    let series = state
        .screener
        .chart(&symbol, timeframe, &config)
        .await
        .map_err(|e| {
            warn!(%symbol, %timeframe, error = %format!("{e:#}"), "chart fetch failed");
            api_error(StatusCode::BAD_GATEWAY, format!("{e:#}"))
        })?;
    Ok(Json(series))
}

// =============================================================================
// Config (public, read-only)
// =============================================================================

async fn config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config_snapshot())
}

// =============================================================================
// Forced refresh (authenticated)
// =============================================================================

async fn refresh(
    access: AdminAccess,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!(action = %access.action, "Forced refresh requested via API");
    let report = state.refresh().await;
    Json(serde_json::json!({
        "report_id": report.id,
        "generated_at": report.generated_at,
        "rows": report.rows.len(),
        "labels": report.label_counts(),
        "warnings": report.warnings,
    }))
}

// =============================================================================
// Cache invalidation (authenticated)
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct InvalidateRequest {
    symbol: Option<String>,
    timeframe: Option<String>,
}

async fn invalidate_cache(
    access: AdminAccess,
    State(state): State<Arc<AppState>>,
    body: Option<Json<InvalidateRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let cache = state.screener.cache();

    let symbol = req
        .symbol
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty());
    let timeframe = match req.timeframe.as_deref() {
        Some(raw) => Some(
            raw.parse::<Timeframe>()
                .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("{e:#}")))?,
        ),
        None => None,
    };

    let removed = match (&symbol, timeframe) {
        (Some(sym), Some(tf)) => usize::from(cache.invalidate(&CandleKey::new(sym.as_str(), tf))),
        (Some(sym), None) => cache.invalidate_symbol(sym),
        (None, None) => cache.clear(),
        (None, Some(_)) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "timeframe invalidation requires a symbol",
            ))
        }
    };

    state.increment_version();
    info!(
        action = %access.action,
        symbol = ?symbol,
        timeframe = ?timeframe,
        removed,
        "Cache invalidated via API"
    );

    Ok(Json(serde_json::json!({ "removed": removed })))
}

// =============================================================================
// Tests
// =============================================================================
