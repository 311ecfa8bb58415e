// =============================================================================
// Rate-Limit Guard: backs off after Delta Exchange answers 429
// =============================================================================
//
// Delta enforces a per-IP request quota over a rolling window. When it is
// exhausted the API answers `429 Too Many Requests` and reports the time left
// until reset (milliseconds) in the `X-RATE-LIMIT-RESET` header.
//
// The guard records that deadline and refuses further requests until it has
// passed, so a fan-out scan fails fast instead of hammering the exchange.
// Counters are atomics so any task may query them lock-free.
// =============================================================================

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Back-off applied when a 429 carries no usable reset header.
const DEFAULT_BACKOFF_MS: i64 = 5_000;
/// Upper bound on a header-provided back-off.
const MAX_BACKOFF_MS: i64 = 300_000;

/// Thread-safe rate-limit state backed by atomic counters.
pub struct RateLimitGuard {
    /// UNIX ms before which requests are refused; 0 when not throttled.
    blocked_until_ms: AtomicI64,
    throttled_total: AtomicU64,
    requests_total: AtomicU64,
}

/// Immutable snapshot (suitable for serialisation into a dashboard payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub blocked_for_ms: i64,
    pub throttled_total: u64,
    pub requests_total: u64,
}

impl RateLimitGuard {
    pub fn new() -> Self {
        Self {
            blocked_until_ms: AtomicI64::new(0),
            throttled_total: AtomicU64::new(0),
            requests_total: AtomicU64::new(0),
        }
    }

    /// Remaining back-off in ms at `now_ms`, or `None` when requests may be
    /// sent.
    pub fn blocked_for(&self, now_ms: i64) -> Option<i64> {
        let until = self.blocked_until_ms.load(Ordering::Relaxed);
        (until > now_ms).then(|| until - now_ms)
    }

    /// Record one outgoing request.
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Inspect a response and arm the back-off on 429.
    pub fn update_from_response(&self, status: StatusCode, headers: &HeaderMap, now_ms: i64) {
        if status != StatusCode::TOO_MANY_REQUESTS {
            return;
        }

        let backoff = headers
            .get("X-RATE-LIMIT-RESET")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_BACKOFF_MS)
            .min(MAX_BACKOFF_MS);

        let until = now_ms + backoff;
        // Never shorten an existing back-off.
        self.blocked_until_ms.fetch_max(until, Ordering::Relaxed);
        let total = self.throttled_total.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            backoff_ms = backoff,
            throttled_total = total,
            "rate limited by exchange, backing off"
        );
    }

    /// Clear the back-off (used after a successful request past the deadline).
    pub fn clear_if_elapsed(&self, now_ms: i64) {
        let until = self.blocked_until_ms.load(Ordering::Relaxed);
        if until != 0 && until <= now_ms {
            let _ = self.blocked_until_ms.compare_exchange(
                until,
                0,
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
            debug!("rate-limit back-off elapsed");
        }
    }

    pub fn snapshot(&self, now_ms: i64) -> RateLimitSnapshot {
        RateLimitSnapshot {
            blocked_for_ms: self.blocked_for(now_ms).unwrap_or(0),
            throttled_total: self.throttled_total.load(Ordering::Relaxed),
            requests_total: self.requests_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimitGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitGuard")
            .field("blocked_until_ms", &self.blocked_until_ms.load(Ordering::Relaxed))
            .field("throttled_total", &self.throttled_total.load(Ordering::Relaxed))
            .finish()
    }
}
