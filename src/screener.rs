// =============================================================================
// Screener: fetch, classify and tabulate every (symbol, timeframe) pair
// =============================================================================
//
// Each pair is evaluated independently:
//   cache hit (unless forced) -> classify
//   otherwise fetch candles   -> build Series -> cache -> classify
//
// Fetches fan out with at most `max_concurrent_fetches` in flight. A failed
// or empty fetch never aborts the scan: the pair degrades to an
// InsufficientData row and the report carries a warning for it.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::delta::DeltaClient;
use crate::indicators::sma::sma_aligned;
use crate::market_data::candle::format_in_offset;
use crate::market_data::{CandleCache, CandleKey, Series, Timeframe};
use crate::runtime_config::ScreenerConfig;
use crate::trend::{analyze, TrendReading};
use crate::types::TrendLabel;

// =============================================================================
// Report types
// =============================================================================

/// Result for one (symbol, timeframe) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRow {
    pub symbol: String,
    pub timeframe: Timeframe,
    #[serde(flatten)]
    pub reading: TrendReading,
    /// Time of the newest candle the reading is based on.
    pub last_candle: Option<DateTime<Utc>>,
    /// Set when the fetch failed; the reading is then InsufficientData.
    pub error: Option<String>,
}

impl ScanRow {
    pub fn label(&self) -> TrendLabel {
        self.reading.label
    }
}

/// Outcome of one scan across the symbol × timeframe grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub short_window: usize,
    pub long_window: usize,
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    /// Sorted by symbol, then timeframe duration.
    pub rows: Vec<ScanRow>,
    pub warnings: Vec<String>,
}

impl ScanReport {
    /// symbol -> timeframe -> label.
    pub fn matrix(&self) -> BTreeMap<String, BTreeMap<Timeframe, TrendLabel>> {
        let mut out: BTreeMap<String, BTreeMap<Timeframe, TrendLabel>> = BTreeMap::new();
        for row in &self.rows {
            out.entry(row.symbol.clone())
                .or_default()
                .insert(row.timeframe, row.label());
        }
        out
    }

    /// Copy of the report keeping only rows whose label is in `labels`. An
    /// empty filter keeps everything.
    pub fn filtered(&self, labels: &[TrendLabel]) -> ScanReport {
        let mut report = self.clone();
        if !labels.is_empty() {
            report.rows.retain(|r| labels.contains(&r.label()));
        }
        report
    }

    /// Number of rows per label.
    pub fn label_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.label().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

/// Price and both averages aligned point-by-point, for overlay charts.
#[derive(Debug, Clone, Serialize)]
pub struct ChartSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub short_window: usize,
    pub long_window: usize,
    /// Candle times rendered in the display offset.
    pub timestamps: Vec<String>,
    pub closes: Vec<f64>,
    pub short_sma: Vec<Option<f64>>,
    pub long_sma: Vec<Option<f64>>,
    pub reading: TrendReading,
}

// =============================================================================
// Screener
// =============================================================================

/// Fetch-and-classify engine over the Delta client and the candle cache.
pub struct Screener {
    client: Arc<DeltaClient>,
    cache: Arc<CandleCache>,
}

impl Screener {
    pub fn new(client: Arc<DeltaClient>, cache: Arc<CandleCache>) -> Self {
        Self { client, cache }
    }

    pub fn client(&self) -> &DeltaClient {
        &self.client
    }

    pub fn cache(&self) -> &CandleCache {
        &self.cache
    }

    /// Symbols to screen: the configured list, or every live product of the
    /// configured contract type and quote asset.
    pub async fn discover_symbols(&self, config: &ScreenerConfig) -> Result<Vec<String>> {
        if !config.symbols.is_empty() {
            return Ok(config.symbols.clone());
        }
        let products = self
            .client
            .list_products(&config.contract_type, &config.quote_asset)
            .await
            .context("symbol discovery failed")?;
        Ok(products.into_iter().map(|p| p.symbol).collect())
    }

    /// Series for `key`, from the cache unless `force` is set or the entry
    /// is stale. Empty payloads are returned but not cached.
    pub async fn load_series(&self, key: &CandleKey, limit: u32, force: bool) -> Result<Arc<Series>> {
        if !force {
            if let Some(series) = self.cache.get(key) {
                debug!(key = %key, "cache hit");
                return Ok(series);
            }
        }

        let candles = self
            .client
            .get_candles(&key.symbol, key.timeframe, limit)
            .await?;
        let series = Arc::new(Series::from_candles(key.clone(), candles));
        if !series.is_empty() {
            self.cache.insert(series.clone());
        }
        Ok(series)
    }

    /// Evaluate every symbol × timeframe pair.
    pub async fn scan(
        &self,
        symbols: &[String],
        timeframes: &[Timeframe],
        config: &ScreenerConfig,
        force: bool,
    ) -> ScanReport {
        let started = Instant::now();
        let pairs: Vec<CandleKey> = symbols
            .iter()
            .flat_map(|s| timeframes.iter().map(move |tf| CandleKey::new(s.clone(), *tf)))
            .collect();
        let pair_count = pairs.len();

        let outcomes: Vec<(ScanRow, Option<String>)> = stream::iter(pairs)
            .map(|key| self.evaluate(key, config, force))
            .buffer_unordered(config.max_concurrent_fetches.max(1))
            .collect()
            .await;

        let mut rows = Vec::with_capacity(outcomes.len());
        let mut warnings = Vec::new();
        for (row, warning) in outcomes {
            rows.push(row);
            warnings.extend(warning);
        }
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.timeframe.cmp(&b.timeframe)));
        warnings.sort();

        let report = ScanReport {
            id: Uuid::new_v4(),
            generated_at: Utc::now(),
            short_window: config.trend.short_window,
            long_window: config.trend.long_window,
            symbols: symbols.to_vec(),
            timeframes: timeframes.to_vec(),
            rows,
            warnings,
        };

        info!(
            report_id = %report.id,
            pairs = pair_count,
            warnings = report.warnings.len(),
            labels = ?report.label_counts(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan complete"
        );

        report
    }

    async fn evaluate(
        &self,
        key: CandleKey,
        config: &ScreenerConfig,
        force: bool,
    ) -> (ScanRow, Option<String>) {
        match self.load_series(&key, config.candle_limit, force).await {
            Ok(series) if series.is_empty() => {
                debug!(key = %key, "no candles returned");
                let warning = format!("No data for {} @ {}", key.symbol, key.timeframe);
                (row_without_data(key, None), Some(warning))
            }
            Ok(series) => {
                let reading = analyze(&series.closes(), &config.trend);
                let row = ScanRow {
                    symbol: key.symbol,
                    timeframe: key.timeframe,
                    reading,
                    last_candle: series.last_timestamp(),
                    error: None,
                };
                (row, None)
            }
            Err(e) => {
                warn!(key = %key, error = %format!("{e:#}"), "candle fetch failed, treating as no data");
                let warning = format!("Data error for {} @ {}: {e:#}", key.symbol, key.timeframe);
                (row_without_data(key, Some(format!("{e:#}"))), Some(warning))
            }
        }
    }

    /// Chart payload for one pair.
    pub async fn chart(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        config: &ScreenerConfig,
    ) -> Result<ChartSeries> {
        let key = CandleKey::new(symbol, timeframe);
        let series = self.load_series(&key, config.candle_limit, false).await?;
        let closes = series.closes();
        let offset = config.display_utc_offset_minutes;

        Ok(ChartSeries {
            symbol: symbol.to_string(),
            timeframe,
            short_window: config.trend.short_window,
            long_window: config.trend.long_window,
            timestamps: series
                .candles()
                .iter()
                .map(|c| format_in_offset(c.timestamp, offset))
                .collect(),
            short_sma: sma_aligned(&closes, config.trend.short_window),
            long_sma: sma_aligned(&closes, config.trend.long_window),
            reading: analyze(&closes, &config.trend),
            closes,
        })
    }
}

fn row_without_data(key: CandleKey, error: Option<String>) -> ScanRow {
    ScanRow {
        symbol: key.symbol,
        timeframe: key.timeframe,
        reading: TrendReading::no_data(),
        last_candle: None,
        error,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::test_support::{spawn_fake_exchange, FakeExchange};

    async fn screener_with(fake: &FakeExchange) -> Screener {
        let base = spawn_fake_exchange(fake.clone()).await;
        let client = Arc::new(DeltaClient::new(base, Duration::from_secs(5)).unwrap());
        let cache = Arc::new(CandleCache::new(64, Duration::from_secs(300)));
        Screener::new(client, cache)
    }

    fn rising() -> Vec<f64> {
        (1..=250).map(|x| x as f64).collect()
    }

    fn falling() -> Vec<f64> {
        (1..=250).rev().map(|x| x as f64).collect()
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn scan_classifies_and_degrades() {
        let fake = FakeExchange::default();
        fake.set_closes("BTCUSD", rising());
        fake.set_closes("ETHUSD", falling());
        fake.fail_symbol("SOLUSD");
        let screener = screener_with(&fake).await;
        let config = ScreenerConfig::default();

        let report = screener
            .scan(
                &symbols(&["SOLUSD", "ETHUSD", "XRPUSD", "BTCUSD"]),
                &[Timeframe::H4, Timeframe::H1],
                &config,
                false,
            )
            .await;

        assert_eq!(report.rows.len(), 8);
        let order: Vec<(&str, Timeframe)> = report
            .rows
            .iter()
            .map(|r| (r.symbol.as_str(), r.timeframe))
            .collect();
        assert_eq!(order[0], ("BTCUSD", Timeframe::H1));
        assert_eq!(order[1], ("BTCUSD", Timeframe::H4));
        assert_eq!(order[7], ("XRPUSD", Timeframe::H4));

        let matrix = report.matrix();
        assert_eq!(matrix["BTCUSD"][&Timeframe::H1], TrendLabel::Bullish);
        assert_eq!(matrix["ETHUSD"][&Timeframe::H4], TrendLabel::Bearish);
        assert_eq!(matrix["SOLUSD"][&Timeframe::H1], TrendLabel::InsufficientData);
        assert_eq!(matrix["XRPUSD"][&Timeframe::H1], TrendLabel::InsufficientData);

        let sol = report.rows.iter().find(|r| r.symbol == "SOLUSD").unwrap();
        assert!(sol.error.is_some());
        let xrp = report.rows.iter().find(|r| r.symbol == "XRPUSD").unwrap();
        assert!(xrp.error.is_none());

        assert_eq!(report.warnings.len(), 4);
        assert!(report.warnings.iter().any(|w| w.starts_with("Data error for SOLUSD @ 1h")));
        assert!(report.warnings.iter().any(|w| w == "No data for XRPUSD @ 4h"));

        let btc = &report.rows[0];
        assert_eq!(btc.reading.candles, 250);
        assert_eq!(btc.reading.last_close, Some(250.0));
        assert!(btc.last_candle.is_some());
    }

    #[tokio::test]
    async fn cache_avoids_refetch_unless_forced() {
        let fake = FakeExchange::default();
        fake.set_closes("BTCUSD", rising());
        let screener = screener_with(&fake).await;
        let config = ScreenerConfig::default();
        let syms = symbols(&["BTCUSD", "XRPUSD"]);
        let tfs = [Timeframe::H1, Timeframe::D1];

        screener.scan(&syms, &tfs, &config, false).await;
        assert_eq!(fake.candle_requests(), 4);
        assert_eq!(screener.cache().len(), 2);

        // BTCUSD is cached; XRPUSD had no data and is asked again.
        screener.scan(&syms, &tfs, &config, false).await;
        assert_eq!(fake.candle_requests(), 6);

        screener.scan(&syms, &tfs, &config, true).await;
        assert_eq!(fake.candle_requests(), 10);
    }

    #[tokio::test]
    async fn filtered_and_counts() {
        let fake = FakeExchange::default();
        fake.set_closes("BTCUSD", rising());
        fake.set_closes("ETHUSD", falling());
        let screener = screener_with(&fake).await;
        let report = screener
            .scan(
                &symbols(&["BTCUSD", "ETHUSD"]),
                &[Timeframe::H1],
                &ScreenerConfig::default(),
                false,
            )
            .await;

        let bullish = report.filtered(&[TrendLabel::Bullish]);
        assert_eq!(bullish.rows.len(), 1);
        assert_eq!(bullish.rows[0].symbol, "BTCUSD");
        assert_eq!(report.filtered(&[]).rows.len(), 2);

        let counts = report.label_counts();
        assert_eq!(counts.get("Bullish"), Some(&1));
        assert_eq!(counts.get("Bearish"), Some(&1));
    }

    #[tokio::test]
    async fn discover_prefers_configured_symbols() {
        let fake = FakeExchange::default();
        let screener = screener_with(&fake).await;

        let mut config = ScreenerConfig::default();
        assert_eq!(
            screener.discover_symbols(&config).await.unwrap(),
            vec!["BTCUSD", "ETHUSD"]
        );

        config.symbols = vec!["SOLUSD".into()];
        assert_eq!(screener.discover_symbols(&config).await.unwrap(), vec!["SOLUSD"]);
    }

    #[tokio::test]
    async fn chart_aligns_averages() {
        let fake = FakeExchange::default();
        fake.set_closes("BTCUSD", rising());
        let screener = screener_with(&fake).await;
        let chart = screener
            .chart("BTCUSD", Timeframe::H1, &ScreenerConfig::default())
            .await
            .unwrap();

        assert_eq!(chart.closes.len(), 250);
        assert_eq!(chart.timestamps.len(), 250);
        assert!(chart.timestamps[0].ends_with("+05:30"));
        assert_eq!(chart.short_sma[18], None);
        assert_eq!(chart.short_sma[19], Some(10.5));
        assert_eq!(chart.long_sma[198], None);
        assert_eq!(chart.long_sma[199], Some(100.5));
        assert_eq!(chart.reading.label, TrendLabel::Bullish);
    }
}
