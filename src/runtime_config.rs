// =============================================================================
// Runtime Configuration: screener settings with atomic save
// =============================================================================
//
// Every tunable lives here: which contracts to screen, which timeframes, the
// moving-average windows, cache and refresh policy, and HTTP limits.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::delta::client::DEFAULT_BASE_URL;
use crate::market_data::Timeframe;
use crate::trend::TrendConfig;

/// Default file the service loads at startup.
pub const CONFIG_PATH: &str = "screener_config.json";

/// Most candles the exchange returns for one history request.
pub const MAX_CANDLE_LIMIT: u32 = 2000;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_api_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_contract_type() -> String {
    "perpetual_futures".to_string()
}

fn default_quote_asset() -> String {
    "USD".to_string()
}

fn default_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1]
}

fn default_candle_limit() -> u32 {
    300
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_max_entries() -> usize {
    1024
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_display_utc_offset_minutes() -> i32 {
    // IST (UTC+05:30).
    330
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// ScreenerConfig
// =============================================================================

/// Top-level configuration for the screener.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenerConfig {
    // --- Exchange -----------------------------------------------------------

    /// Base URL of the Delta Exchange REST API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Contract type used to discover symbols.
    #[serde(default = "default_contract_type")]
    pub contract_type: String,

    /// Quote currency used to discover symbols.
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    /// Explicit symbol list. Empty means "discover from the product listing".
    #[serde(default)]
    pub symbols: Vec<String>,

    // --- Analysis -----------------------------------------------------------

    /// Timeframes evaluated for every symbol.
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,

    /// Moving-average windows and crossover switch.
    #[serde(default)]
    pub trend: TrendConfig,

    /// Candles requested per (symbol, timeframe). Must cover the long window.
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u32,

    // --- Cache & refresh ----------------------------------------------------

    /// Seconds a fetched series stays fresh in the cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Maximum cached series. 0 disables the cache.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Seconds between automatic rescans. 0 disables auto-refresh.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    // --- HTTP ---------------------------------------------------------------

    /// Upper bound on candle fetches in flight during a scan.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Per-request timeout for exchange calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Offset (minutes east of UTC) used when rendering timestamps.
    #[serde(default = "default_display_utc_offset_minutes")]
    pub display_utc_offset_minutes: i32,

    /// Address the API server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            contract_type: default_contract_type(),
            quote_asset: default_quote_asset(),
            symbols: Vec::new(),
            timeframes: default_timeframes(),
            trend: TrendConfig::default(),
            candle_limit: default_candle_limit(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            refresh_interval_secs: default_refresh_interval_secs(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            request_timeout_secs: default_request_timeout_secs(),
            display_utc_offset_minutes: default_display_utc_offset_minutes(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl ScreenerConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read screener config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse screener config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = config.symbols.len(),
            timeframes = ?config.timeframes,
            "screener config loaded"
        );

        Ok(config)
    }

    /// Load `path`, falling back to defaults when it is missing or invalid.
    ///
    /// A missing file is seeded with the defaults so operators get a template
    /// to edit. An unreadable or malformed file is left untouched. Env
    /// overrides are applied by the caller afterwards and never written back.
    pub fn load_or_init(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(_) if !path.exists() => {
                info!(path = %path.display(), "no screener config found, writing defaults");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!(error = %format!("{e:#}"), "failed to write default screener config");
                }
                config
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "failed to load screener config, using defaults");
                Self::default()
            }
        }
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise screener config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "screener config saved (atomic)");
        Ok(())
    }

    /// Apply environment overrides:
    /// `SCREENER_SYMBOLS`, `SCREENER_TIMEFRAMES`, `SCREENER_BIND_ADDR`,
    /// `DELTA_API_BASE`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(syms) = lookup("SCREENER_SYMBOLS") {
            self.symbols = parse_symbol_list(&syms);
        }
        if let Some(tfs) = lookup("SCREENER_TIMEFRAMES") {
            self.timeframes =
                Timeframe::parse_list(&tfs).context("invalid SCREENER_TIMEFRAMES")?;
        }
        if let Some(addr) = lookup("SCREENER_BIND_ADDR").filter(|a| !a.trim().is_empty()) {
            self.bind_addr = addr.trim().to_string();
        }
        if let Some(base) = lookup("DELTA_API_BASE").filter(|b| !b.trim().is_empty()) {
            self.api_base_url = base.trim().to_string();
        }
        Ok(())
    }

    /// Reject settings the screener cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.trend.short_window == 0 || self.trend.long_window == 0 {
            bail!("moving-average windows must be positive");
        }
        if self.trend.short_window >= self.trend.long_window {
            bail!(
                "short window ({}) must be smaller than long window ({})",
                self.trend.short_window,
                self.trend.long_window
            );
        }
        if (self.candle_limit as usize) < self.trend.required_closes() {
            bail!(
                "candle_limit ({}) must cover the long window ({})",
                self.candle_limit,
                self.trend.required_closes()
            );
        }
        if self.candle_limit > MAX_CANDLE_LIMIT {
            bail!(
                "candle_limit ({}) exceeds the exchange maximum of {MAX_CANDLE_LIMIT}",
                self.candle_limit
            );
        }
        if self.timeframes.is_empty() {
            bail!("at least one timeframe is required");
        }
        if self.max_concurrent_fetches == 0 {
            bail!("max_concurrent_fetches must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        if !(-1440..=1440).contains(&self.display_utc_offset_minutes) {
            bail!("display_utc_offset_minutes must be within ±1440");
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `None` when auto-refresh is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

/// Split a comma-separated symbol list, upper-casing and dropping blanks and
/// duplicates while keeping first-seen order.
pub fn parse_symbol_list(s: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for sym in s.split(',').map(|s| s.trim().to_uppercase()) {
        if !sym.is_empty() && !out.contains(&sym) {
            out.push(sym);
        }
    }
    out
}
