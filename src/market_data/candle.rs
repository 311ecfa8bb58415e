use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::timeframe::Timeframe;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle from the history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

// ---------------------------------------------------------------------------
// Series -- ordered candles for one (symbol, timeframe)
// ---------------------------------------------------------------------------

/// Candles for one key, strictly increasing by timestamp. Immutable once
/// built; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    key: CandleKey,
    candles: Vec<Candle>,
}

impl Series {
    /// Build a series from candles in any order.
    ///
    /// Candles are sorted by timestamp. When two candles share a timestamp the
    /// one that came later in the input wins (the exchange revises the
    /// in-progress candle in place).
    pub fn from_candles(key: CandleKey, mut candles: Vec<Candle>) -> Self {
        let received = candles.len();
        // Stable sort keeps input order among equal timestamps.
        candles.sort_by_key(|c| c.timestamp);

        let mut ordered: Vec<Candle> = Vec::with_capacity(candles.len());
        for candle in candles {
            match ordered.last_mut() {
                Some(last) if last.timestamp == candle.timestamp => *last = candle,
                _ => ordered.push(candle),
            }
        }

        if ordered.len() != received {
            debug!(
                key = %key,
                received,
                kept = ordered.len(),
                "duplicate candle timestamps collapsed"
            );
        }

        Self {
            key,
            candles: ordered,
        }
    }

    pub fn key(&self) -> &CandleKey {
        &self.key
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Close prices, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    /// Timestamp of the newest candle.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.candles.last().map(|c| c.timestamp)
    }
}

/// Render `ts` in the display offset (minutes east of UTC), e.g.
/// `2024-01-01 05:30:00 +05:30`. Offsets outside ±24h fall back to UTC.
pub fn format_in_offset(ts: DateTime<Utc>, offset_minutes: i32) -> String {
    let offset = offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());
    ts.with_timezone(&offset)
        .format("%Y-%m-%d %H:%M:%S %:z")
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle_at(secs: i64, close: f64) -> Candle {
        let ts = Utc.timestamp_opt(secs, 0).unwrap();
        Candle::new(ts, close, close + 1.0, close - 1.0, close, 10.0)
    }

    fn key() -> CandleKey {
        CandleKey::new("BTCUSD", Timeframe::H1)
    }

    #[test]
    fn series_sorts_out_of_order_input() {
        let series = Series::from_candles(
            key(),
            vec![candle_at(7_200, 3.0), candle_at(0, 1.0), candle_at(3_600, 2.0)],
        );
        assert_eq!(series.closes(), vec![1.0, 2.0, 3.0]);
        assert_eq!(series.last_timestamp(), Utc.timestamp_opt(7_200, 0).single());
    }

    #[test]
    fn series_keeps_last_duplicate() {
        let series = Series::from_candles(
            key(),
            vec![candle_at(0, 1.0), candle_at(3_600, 2.0), candle_at(3_600, 2.5)],
        );
        assert_eq!(series.len(), 2);
        assert_eq!(series.closes(), vec![1.0, 2.5]);
        let ts: Vec<_> = series.candles().iter().map(|c| c.timestamp).collect();
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn empty_series() {
        let series = Series::from_candles(key(), Vec::new());
        assert!(series.is_empty());
        assert_eq!(series.last_timestamp(), None);
    }

    #[test]
    fn key_display() {
        assert_eq!(key().to_string(), "BTCUSD@1h");
    }

    #[test]
    fn format_in_ist() {
        let ts = Utc.timestamp_opt(1_704_067_200, 0).unwrap(); // 2024-01-01T00:00:00Z
        assert_eq!(format_in_offset(ts, 330), "2024-01-01 05:30:00 +05:30");
        assert_eq!(format_in_offset(ts, 0), "2024-01-01 00:00:00 +00:00");
        assert_eq!(format_in_offset(ts, 99_999), "2024-01-01 00:00:00 +00:00");
    }
}
