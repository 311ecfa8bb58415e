// =============================================================================
// Delta Exchange REST API Client: public market data
// =============================================================================
//
// Only unauthenticated endpoints are used:
//   GET /v2/products               product listing (filtered locally)
//   GET /v2/history/candles        OHLCV history for symbol/resolution/range
//
// Every request carries an explicit timeout. Responses are decoded through
// the record schema in `schema.rs`; a payload without usable candles yields an
// empty vector, which callers treat as "no data".
// =============================================================================

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use tracing::{debug, instrument, warn};

use super::rate_limit::{RateLimitGuard, RateLimitSnapshot};
use super::schema::{filter_products, parse_candles, parse_products, Envelope, Product};
use crate::market_data::{Candle, Timeframe};

/// Public Delta Exchange (India) REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.india.delta.exchange";

/// Delta Exchange REST API client.
pub struct DeltaClient {
    base_url: String,
    client: reqwest::Client,
    rate_limit: RateLimitGuard,
}

impl DeltaClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a client for `base_url` (no trailing slash required) with the
    /// given per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, timeout_ms = timeout.as_millis() as u64, "DeltaClient initialised");

        Ok(Self {
            base_url,
            client,
            rate_limit: RateLimitGuard::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn rate_limit_snapshot(&self) -> RateLimitSnapshot {
        self.rate_limit.snapshot(Utc::now().timestamp_millis())
    }

    // -------------------------------------------------------------------------
    // Products
    // -------------------------------------------------------------------------

    /// GET /v2/products?contract_types=…: every parseable product of the
    /// given contract type.
    #[instrument(skip(self), name = "delta::get_products")]
    pub async fn get_products(&self, contract_type: &str) -> Result<Vec<Product>> {
        let envelope = self
            .get_envelope("/v2/products", &[("contract_types", contract_type.to_string())])
            .await?;

        let records = envelope
            .records()
            .context("products response has no result array")?;
        let products = parse_products(records);

        debug!(count = products.len(), "products fetched");
        Ok(products)
    }

    /// Live products of `contract_type` quoted in `quote_asset`, sorted by
    /// symbol.
    #[instrument(skip(self), name = "delta::list_products")]
    pub async fn list_products(&self, contract_type: &str, quote_asset: &str) -> Result<Vec<Product>> {
        let all = self.get_products(contract_type).await?;
        let total = all.len();
        let kept = filter_products(all, contract_type, quote_asset);
        debug!(total, kept = kept.len(), "products filtered");
        Ok(kept)
    }

    // -------------------------------------------------------------------------
    // Candles
    // -------------------------------------------------------------------------

    /// The most recent `limit` candles of `symbol` at `timeframe`.
    #[instrument(skip(self), name = "delta::get_candles")]
    pub async fn get_candles(&self, symbol: &str, timeframe: Timeframe, limit: u32) -> Result<Vec<Candle>> {
        let end = Utc::now();
        let start = window_start(end, timeframe, limit)?;
        self.get_candles_between(symbol, timeframe, start, end).await
    }

    /// GET /v2/history/candles for `[start, end]`.
    pub async fn get_candles_between(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let envelope = self
            .get_envelope(
                "/v2/history/candles",
                &[
                    ("resolution", timeframe.as_str().to_string()),
                    ("symbol", symbol.to_string()),
                    ("start", start.timestamp().to_string()),
                    ("end", end.timestamp().to_string()),
                ],
            )
            .await?;

        let Some(records) = envelope.records() else {
            warn!(symbol, timeframe = %timeframe, "candles response has no record array");
            return Ok(Vec::new());
        };

        let received = records.len();
        let candles = parse_candles(records);
        debug!(symbol, timeframe = %timeframe, received, count = candles.len(), "candles fetched");
        Ok(candles)
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    /// Send a GET, check the rate-limit guard, status and `success` flag, and
    /// decode the envelope.
    async fn get_envelope(&self, path: &str, query: &[(&str, String)]) -> Result<Envelope> {
        let now_ms = Utc::now().timestamp_millis();
        if let Some(wait) = self.rate_limit.blocked_for(now_ms) {
            bail!("rate limited by exchange, retry in {wait} ms");
        }

        let url = format!("{}{}", self.base_url, path);
        self.rate_limit.record_request();

        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let status = resp.status();
        let now_ms = Utc::now().timestamp_millis();
        self.rate_limit.update_from_response(status, resp.headers(), now_ms);

        let text = resp
            .text()
            .await
            .with_context(|| format!("failed to read {path} response body"))?;

        if !status.is_success() {
            bail!("Delta GET {path} returned {status}: {}", truncate(&text, 256));
        }
        self.rate_limit.clear_if_elapsed(now_ms);

        let envelope: Envelope = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse {path} response"))?;

        if envelope.success == Some(false) {
            let detail = envelope
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            bail!("Delta GET {path} reported failure: {detail}");
        }

        Ok(envelope)
    }
}

/// Start of a window holding `limit` candles of `timeframe` that ends at `end`.
fn window_start(end: DateTime<Utc>, timeframe: Timeframe, limit: u32) -> Result<DateTime<Utc>> {
    let start = timeframe
        .seconds()
        .checked_mul(i64::from(limit.max(1)))
        .and_then(chrono::Duration::try_seconds)
        .and_then(|span| end.checked_sub_signed(span));
    match start {
        Some(start) => Ok(start),
        None => bail!("{limit} candles of {timeframe} reach past the representable time range"),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

impl std::fmt::Debug for DeltaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaClient")
            .field("base_url", &self.base_url)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Tests: against a fake exchange served locally by axum
// -----------------------------------------------------------------------------
