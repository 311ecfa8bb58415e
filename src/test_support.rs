// =============================================================================
// Test support: a fake Delta Exchange served locally by axum
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;

use crate::market_data::Timeframe;

#[derive(Debug, Clone, Deserialize)]
pub struct CandleQuery {
    pub resolution: String,
    pub symbol: String,
    pub start: i64,
    pub end: i64,
}

#[derive(Default)]
struct FakeState {
    closes: HashMap<String, Vec<f64>>,
    failing: HashSet<String>,
    throttled: HashSet<String>,
    last_query: Option<CandleQuery>,
    candle_requests: usize,
}

/// Scriptable exchange: per-symbol close series, failures and throttling.
#[derive(Clone, Default)]
pub struct FakeExchange {
    state: Arc<Mutex<FakeState>>,
}

impl FakeExchange {
    /// Serve `closes` (oldest first) for `symbol` at every resolution.
    pub fn set_closes(&self, symbol: &str, closes: Vec<f64>) {
        self.state.lock().closes.insert(symbol.to_string(), closes);
    }

    /// Answer 500 for candle requests on `symbol`.
    pub fn fail_symbol(&self, symbol: &str) {
        self.state.lock().failing.insert(symbol.to_string());
    }

    /// Answer 429 for candle requests on `symbol`.
    pub fn throttle_symbol(&self, symbol: &str) {
        self.state.lock().throttled.insert(symbol.to_string());
    }

    pub fn last_candle_query(&self) -> Option<CandleQuery> {
        self.state.lock().last_query.clone()
    }

    pub fn candle_requests(&self) -> usize {
        self.state.lock().candle_requests
    }
}

/// Start the fake exchange on an ephemeral port and return its base URL.
pub async fn spawn_fake_exchange(fake: FakeExchange) -> String {
    let app = Router::new()
        .route("/v2/products", get(products))
        .route("/v2/history/candles", get(candles))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake exchange");
    let addr = listener.local_addr().expect("fake exchange addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn products() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "result": [
            {"symbol": "ETHUSD", "contract_type": "perpetual_futures", "state": "live",
             "quoting_asset": {"symbol": "USD"}, "settling_asset": {"symbol": "USD"}},
            {"symbol": "BTCUSD", "contract_type": "perpetual_futures", "state": "live",
             "description": "Bitcoin Perpetual",
             "quoting_asset": {"symbol": "USD"}, "settling_asset": {"symbol": "USD"}},
            {"symbol": "XRPUSD", "contract_type": "perpetual_futures", "state": "expired",
             "quoting_asset": {"symbol": "USD"}},
            {"symbol": "BTCUSDT", "contract_type": "perpetual_futures", "state": "live",
             "quoting_asset": {"symbol": "USDT"}},
            {"symbol": "C-BTC-90000-311225", "contract_type": "call_options", "state": "live",
             "quoting_asset": {"symbol": "USD"}}
        ]
    }))
}

async fn candles(State(fake): State<FakeExchange>, Query(q): Query<CandleQuery>) -> Response {
    let mut state = fake.state.lock();
    state.candle_requests += 1;
    state.last_query = Some(q.clone());

    if state.failing.contains(&q.symbol) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": {"code": "internal_error"}})),
        )
            .into_response();
    }

    if state.throttled.contains(&q.symbol) {
        let mut resp = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"success": false, "error": {"code": "rate_limited"}})),
        )
            .into_response();
        resp.headers_mut()
            .insert("X-RATE-LIMIT-RESET", HeaderValue::from_static("60000"));
        return resp;
    }

    let step = q
        .resolution
        .parse::<Timeframe>()
        .map(|tf| tf.seconds())
        .unwrap_or(60);
    let closes = state.closes.get(&q.symbol).cloned().unwrap_or_default();
    let n = closes.len() as i64;
    let records: Vec<serde_json::Value> = closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            json!({
                "time": q.end - (n - i as i64) * step,
                "open": close,
                "high": close + 1.0,
                "low": close - 1.0,
                "close": close,
                "volume": 100.0,
            })
        })
        .collect();

    Json(json!({"success": true, "result": records})).into_response()
}
