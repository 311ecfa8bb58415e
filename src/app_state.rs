// =============================================================================
// Central Application State: Delta Trend Screener
// =============================================================================
//
// Ties the configuration, the screener engine and the latest published report
// together, and builds the status snapshot served by the dashboard API.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for mutable shared values. Guards are never held
//     across an `.await`; async paths clone the config first.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::api::auth::AdminToken;
use crate::delta::rate_limit::RateLimitSnapshot;
use crate::market_data::CacheStats;
use crate::runtime_config::ScreenerConfig;
use crate::screener::{ScanReport, Screener};

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

// =============================================================================
// Status snapshot
// =============================================================================

/// Serialisable service status behind `GET /api/v1/health`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub symbols: usize,
    pub timeframes: usize,
    pub last_report_id: Option<String>,
    pub last_report_at: Option<DateTime<Utc>>,
    pub scans_completed: u64,
    pub cache: CacheStats,
    pub rate_limit: RateLimitSnapshot,
    pub recent_errors: Vec<ErrorRecord>,
}

// =============================================================================
// AppState
// =============================================================================

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, bumped whenever a new report
    /// is published or the cache is invalidated. The WebSocket feed uses it to
    /// detect changes.
    pub state_version: AtomicU64,

    pub config: Arc<RwLock<ScreenerConfig>>,

    /// Resolved once at startup; guards the admin routes and the WebSocket.
    pub admin_token: AdminToken,

    pub screener: Arc<Screener>,

    /// Symbols resolved by the last discovery.
    pub symbols: RwLock<Vec<String>>,

    /// Most recent full scan published by the refresh loop or `/refresh`.
    pub latest_report: RwLock<Option<Arc<ScanReport>>>,

    pub scans_completed: AtomicU64,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    /// Serialises forced rescans so overlapping refreshes do not double the
    /// exchange load.
    pub refresh_lock: tokio::sync::Mutex<()>,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: ScreenerConfig, screener: Arc<Screener>, admin_token: AdminToken) -> Self {
        let symbols = config.symbols.clone();
        Self {
            state_version: AtomicU64::new(0),
            config: Arc::new(RwLock::new(config)),
            admin_token,
            screener,
            symbols: RwLock::new(symbols),
            latest_report: RwLock::new(None),
            scans_completed: AtomicU64::new(0),
            recent_errors: RwLock::new(Vec::new()),
            refresh_lock: tokio::sync::Mutex::new(()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error message. Oldest entries are evicted beyond
    /// [`MAX_RECENT_ERRORS`].
    pub fn push_error(&self, msg: String) {
        let record = ErrorRecord {
            message: msg,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }

    // ── Reports ─────────────────────────────────────────────────────────

    pub fn config_snapshot(&self) -> ScreenerConfig {
        self.config.read().clone()
    }

    pub fn latest_report(&self) -> Option<Arc<ScanReport>> {
        self.latest_report.read().clone()
    }

    pub fn publish_report(&self, report: ScanReport) -> Arc<ScanReport> {
        let report = Arc::new(report);
        *self.latest_report.write() = Some(report.clone());
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
        self.increment_version();
        report
    }

    /// Resolve the symbol universe (configured list or product discovery).
    ///
    /// On discovery failure the previously known symbols are kept and the
    /// error is recorded.
    pub async fn refresh_symbols(&self) -> Vec<String> {
        let config = self.config_snapshot();
        match self.screener.discover_symbols(&config).await {
            Ok(symbols) => {
                *self.symbols.write() = symbols.clone();
                symbols
            }
            Err(e) => {
                self.push_error(format!("{e:#}"));
                self.symbols.read().clone()
            }
        }
    }

    /// Full forced rescan of the configured universe; publishes and returns
    /// the report.
    pub async fn refresh(&self) -> Arc<ScanReport> {
        let _guard = self.refresh_lock.lock().await;
        let config = self.config_snapshot();
        let symbols = self.refresh_symbols().await;

        let report = self
            .screener
            .scan(&symbols, &config.timeframes, &config, true)
            .await;
        if let Some(summary) = warnings_summary(&report.warnings) {
            warn!(count = report.warnings.len(), "scan finished with warnings");
            self.push_error(summary);
        }
        let purged = self.screener.cache().purge_expired();
        if purged > 0 {
            info!(purged, "expired cache entries purged");
        }
        self.publish_report(report)
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    pub fn build_status(&self) -> StatusSnapshot {
        let config = self.config.read();
        let latest = self.latest_report();
        StatusSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            symbols: self.symbols.read().len(),
            timeframes: config.timeframes.len(),
            last_report_id: latest.as_ref().map(|r| r.id.to_string()),
            last_report_at: latest.as_ref().map(|r| r.generated_at),
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            cache: self.screener.cache().stats(),
            rate_limit: self.screener.client().rate_limit_snapshot(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

/// One log line for a whole scan: the count plus the first few messages.
fn warnings_summary(warnings: &[String]) -> Option<String> {
    const SHOWN: usize = 3;
    let first = warnings.first()?;
    if warnings.len() == 1 {
        return Some(first.clone());
    }
    let shown = warnings[..warnings.len().min(SHOWN)].join("; ");
    let more = warnings.len().saturating_sub(SHOWN);
    Some(if more > 0 {
        format!("scan produced {} warnings: {shown} (+{more} more)", warnings.len())
    } else {
        format!("scan produced {} warnings: {shown}", warnings.len())
    })
}
