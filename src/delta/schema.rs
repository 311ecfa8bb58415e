// =============================================================================
// Delta Exchange wire schema: explicit records at the HTTP boundary
// =============================================================================
//
// Every payload is decoded record-by-record: a single malformed product or
// candle is skipped with a warning instead of failing the whole response.
//
// Candle records arrive in two shapes depending on the endpoint:
//   object:  {"time": 1700000000, "open": 1.0, "high": .., "low": .., "close": .., "volume": ..}
//   array:   [time, open, high, low, close, volume]
// Numbers may be JSON numbers or numeric strings. `time` is UNIX seconds;
// values large enough to be milliseconds are scaled down.
// =============================================================================

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::market_data::Candle;

/// Timestamps above this are treated as milliseconds (year 5138 in seconds).
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Top-level response. The history API uses `result`; the charts API uses
/// `candles`.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub candles: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl Envelope {
    /// The record array, whichever key carried it. `None` when absent or not
    /// an array.
    pub fn records(self) -> Option<Vec<serde_json::Value>> {
        match self.result.or(self.candles)? {
            serde_json::Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Numeric
// ---------------------------------------------------------------------------

/// A JSON number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    pub fn to_f64(&self, field: &str) -> Result<f64> {
        let value = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .with_context(|| format!("field {field}: '{s}' is not a number"))?,
        };
        if !value.is_finite() {
            bail!("field {field} is not finite");
        }
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Candles
// ---------------------------------------------------------------------------

/// One candle record in either wire shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCandle {
    Record {
        time: Numeric,
        open: Numeric,
        high: Numeric,
        low: Numeric,
        close: Numeric,
        #[serde(default)]
        volume: Option<Numeric>,
    },
    Row(Vec<Numeric>),
}

impl TryFrom<RawCandle> for Candle {
    type Error = anyhow::Error;

    fn try_from(raw: RawCandle) -> Result<Self> {
        let (time, open, high, low, close, volume) = match raw {
            RawCandle::Record {
                time,
                open,
                high,
                low,
                close,
                volume,
            } => (
                time.to_f64("time")?,
                open.to_f64("open")?,
                high.to_f64("high")?,
                low.to_f64("low")?,
                close.to_f64("close")?,
                match volume {
                    Some(v) => v.to_f64("volume")?,
                    None => 0.0,
                },
            ),
            RawCandle::Row(cols) => {
                if cols.len() < 5 {
                    bail!("candle row has {} columns, expected at least 5", cols.len());
                }
                (
                    cols[0].to_f64("time")?,
                    cols[1].to_f64("open")?,
                    cols[2].to_f64("high")?,
                    cols[3].to_f64("low")?,
                    cols[4].to_f64("close")?,
                    match cols.get(5) {
                        Some(v) => v.to_f64("volume")?,
                        None => 0.0,
                    },
                )
            }
        };

        let timestamp = parse_timestamp(time)?;
        Ok(Candle::new(timestamp, open, high, low, close, volume))
    }
}

fn parse_timestamp(raw: f64) -> Result<DateTime<Utc>> {
    let mut secs = raw.trunc() as i64;
    if secs > MILLIS_THRESHOLD {
        secs /= 1000;
    }
    if secs <= 0 {
        bail!("timestamp {raw} is not positive");
    }
    Utc.timestamp_opt(secs, 0)
        .single()
        .with_context(|| format!("timestamp {raw} out of range"))
}

/// Decode candle records, skipping malformed ones.
pub fn parse_candles(records: Vec<serde_json::Value>) -> Vec<Candle> {
    let mut candles = Vec::with_capacity(records.len());
    for (idx, record) in records.into_iter().enumerate() {
        let parsed = serde_json::from_value::<RawCandle>(record)
            .context("unrecognised candle shape")
            .and_then(Candle::try_from);
        match parsed {
            Ok(candle) => candles.push(candle),
            Err(e) => warn!(index = idx, error = %e, "skipping malformed candle record"),
        }
    }
    candles
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RawAsset {
    pub symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawProduct {
    pub symbol: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub contract_type: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub quoting_asset: Option<RawAsset>,
    #[serde(default)]
    pub settling_asset: Option<RawAsset>,
}

/// A tradable contract from the product listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub symbol: String,
    pub contract_type: String,
    pub quote_asset: String,
    pub settling_asset: Option<String>,
    pub description: Option<String>,
    /// `live` when the exchange omits the field.
    pub state: String,
}

impl From<RawProduct> for Product {
    fn from(raw: RawProduct) -> Self {
        Self {
            symbol: raw.symbol,
            contract_type: raw.contract_type.unwrap_or_default(),
            quote_asset: raw.quoting_asset.map(|a| a.symbol).unwrap_or_default(),
            settling_asset: raw.settling_asset.map(|a| a.symbol),
            description: raw.description,
            state: raw.state.unwrap_or_else(|| "live".to_string()),
        }
    }
}

/// Decode product records, skipping malformed ones.
pub fn parse_products(records: Vec<serde_json::Value>) -> Vec<Product> {
    let mut products = Vec::with_capacity(records.len());
    for (idx, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<RawProduct>(record) {
            Ok(raw) if !raw.symbol.trim().is_empty() => products.push(raw.into()),
            Ok(_) => warn!(index = idx, "skipping product with empty symbol"),
            Err(e) => warn!(index = idx, error = %e, "skipping malformed product record"),
        }
    }
    products
}

/// Live products of `contract_type` quoted in `quote_asset`
/// (case-insensitive), sorted and deduplicated by symbol.
pub fn filter_products(products: Vec<Product>, contract_type: &str, quote_asset: &str) -> Vec<Product> {
    let mut kept: Vec<Product> = products
        .into_iter()
        .filter(|p| p.contract_type.eq_ignore_ascii_case(contract_type))
        .filter(|p| p.quote_asset.eq_ignore_ascii_case(quote_asset))
        .filter(|p| p.state.eq_ignore_ascii_case("live"))
        .collect();
    kept.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    kept.dedup_by(|a, b| a.symbol == b.symbol);
    kept
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
