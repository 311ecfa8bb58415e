// =============================================================================
// Trend Classification: SMA(short) vs SMA(long)
// =============================================================================
//
// Maps an ordered close-price series to a single TrendLabel.
//
// Decision rule (evaluated at the last close):
//   short or long SMA undefined          => InsufficientData
//   diff(n-1) < 0 and diff(n) > 0        => BullishCrossover   (if enabled)
//   diff(n-1) > 0 and diff(n) < 0        => BearishCrossover   (if enabled)
//   short > long                         => Bullish
//   short < long                         => Bearish
//   otherwise                            => Neutral
//
// where diff(i) = SMA_short(i) - SMA_long(i). Two averages closer than a
// relative tolerance of 1e-9 count as equal, so a flat series whose window
// sums pick up rounding error still reads as Neutral.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::indicators::sma::sma_at;
use crate::types::TrendLabel;

/// Relative tolerance below which the two averages are considered equal.
const EQUALITY_TOLERANCE: f64 = 1e-9;

fn default_short_window() -> usize {
    20
}

fn default_long_window() -> usize {
    200
}

fn default_true() -> bool {
    true
}

/// Window sizes and switches for the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendConfig {
    #[serde(default = "default_short_window")]
    pub short_window: usize,

    #[serde(default = "default_long_window")]
    pub long_window: usize,

    /// Report a crossover when the averages swap order on the last close.
    #[serde(default = "default_true")]
    pub detect_crossover: bool,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            short_window: default_short_window(),
            long_window: default_long_window(),
            detect_crossover: true,
        }
    }
}

impl TrendConfig {
    /// Minimum number of closes for a classification other than
    /// InsufficientData.
    pub fn required_closes(&self) -> usize {
        self.short_window.max(self.long_window)
    }
}

/// A label together with the values it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReading {
    pub label: TrendLabel,
    pub last_close: Option<f64>,
    pub short_sma: Option<f64>,
    pub long_sma: Option<f64>,
    pub candles: usize,
}

impl TrendReading {
    /// Reading for a pair with no usable candles.
    pub fn no_data() -> Self {
        Self {
            label: TrendLabel::InsufficientData,
            last_close: None,
            short_sma: None,
            long_sma: None,
            candles: 0,
        }
    }
}

/// Classify `closes` (oldest first). Never fails.
pub fn classify(closes: &[f64], config: &TrendConfig) -> TrendLabel {
    analyze(closes, config).label
}

/// Classify `closes` and keep the intermediate averages.
pub fn analyze(closes: &[f64], config: &TrendConfig) -> TrendReading {
    let last_close = closes.last().copied().filter(|c| c.is_finite());
    let Some(last) = closes.len().checked_sub(1) else {
        return TrendReading::no_data();
    };

    let short = sma_at(closes, config.short_window, last);
    let long = sma_at(closes, config.long_window, last);

    let label = match (short, long) {
        (Some(s), Some(l)) => {
            let current = order(s, l);
            let previous = if config.detect_crossover && last > 0 {
                match (
                    sma_at(closes, config.short_window, last - 1),
                    sma_at(closes, config.long_window, last - 1),
                ) {
                    (Some(ps), Some(pl)) => Some(order(ps, pl)),
                    _ => None,
                }
            } else {
                None
            };

            match (previous, current) {
                (Some(Ordering::Below), Ordering::Above) => TrendLabel::BullishCrossover,
                (Some(Ordering::Above), Ordering::Below) => TrendLabel::BearishCrossover,
                (_, Ordering::Above) => TrendLabel::Bullish,
                (_, Ordering::Below) => TrendLabel::Bearish,
                (_, Ordering::Level) => TrendLabel::Neutral,
            }
        }
        _ => TrendLabel::InsufficientData,
    };

    trace!(
        candles = closes.len(),
        short = ?short,
        long = ?long,
        label = %label,
        "trend classified"
    );

    TrendReading {
        label,
        last_close,
        short_sma: short,
        long_sma: long,
        candles: closes.len(),
    }
}

/// Position of the short average relative to the long one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ordering {
    Below,
    Level,
    Above,
}

fn order(short: f64, long: f64) -> Ordering {
    let scale = short.abs().max(long.abs()).max(1.0);
    let diff = short - long;
    if diff.abs() <= EQUALITY_TOLERANCE * scale {
        Ordering::Level
    } else if diff > 0.0 {
        Ordering::Above
    } else {
        Ordering::Below
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn small(short_window: usize, long_window: usize) -> TrendConfig {
        TrendConfig {
            short_window,
            long_window,
            detect_crossover: true,
        }
    }

    #[test]
    fn empty_series_is_insufficient() {
        let reading = analyze(&[], &TrendConfig::default());
        assert_eq!(reading, TrendReading::no_data());
    }

    #[test]
    fn shorter_than_long_window_is_insufficient() {
        let cfg = TrendConfig::default();
        for len in [1, 19, 20, 150, 199] {
            let closes: Vec<f64> = (0..len).map(|i| 100.0 + i as f64).collect();
            assert_eq!(
                classify(&closes, &cfg),
                TrendLabel::InsufficientData,
                "len {len}"
            );
        }
    }

    #[test]
    fn zero_window_is_insufficient() {
        let closes = vec![1.0; 300];
        assert_eq!(classify(&closes, &small(0, 200)), TrendLabel::InsufficientData);
        assert_eq!(classify(&closes, &small(20, 0)), TrendLabel::InsufficientData);
    }

    #[test]
    fn constant_series_is_neutral() {
        let cfg = TrendConfig::default();
        for value in [100.0, 0.1, 12345.678] {
            let closes = vec![value; 250];
            let reading = analyze(&closes, &cfg);
            assert_eq!(reading.label, TrendLabel::Neutral, "value {value}");
            assert!((reading.short_sma.unwrap() - value).abs() < 1e-9);
            assert!((reading.long_sma.unwrap() - value).abs() < 1e-9);
        }
    }

    #[test]
    fn rising_series_is_bullish() {
        let closes: Vec<f64> = (1..=250).map(|x| x as f64).collect();
        assert_eq!(classify(&closes, &TrendConfig::default()), TrendLabel::Bullish);
    }

    #[test]
    fn falling_series_is_bearish() {
        let closes: Vec<f64> = (1..=250).rev().map(|x| x as f64).collect();
        assert_eq!(classify(&closes, &TrendConfig::default()), TrendLabel::Bearish);
    }

    #[test]
    fn step_up_after_long_base_is_bullish() {
        // 200 x 1.0 then 20 x 5.0: short = 5.0, long = (180 + 100) / 200 = 1.4
        let mut closes = vec![1.0; 200];
        closes.extend(std::iter::repeat(5.0).take(20));
        assert_eq!(closes.len(), 220);

        let reading = analyze(&closes, &TrendConfig::default());
        assert_eq!(reading.label, TrendLabel::Bullish);
        assert!((reading.short_sma.unwrap() - 5.0).abs() < 1e-12);
        assert!((reading.long_sma.unwrap() - 1.4).abs() < 1e-12);
        assert_eq!(reading.last_close, Some(5.0));
        assert_eq!(reading.candles, 220);
    }

    #[test]
    fn bullish_crossover_small_windows() {
        // diff at n-1: 1.0 - 2.5 < 0; diff at n: 5.5 - 4.0 > 0
        let closes = vec![4.0, 4.0, 4.0, 4.0, 1.0, 1.0, 10.0];
        assert_eq!(classify(&closes, &small(2, 4)), TrendLabel::BullishCrossover);
    }

    #[test]
    fn bearish_crossover_small_windows() {
        // diff at n-1: 13.0 - 11.5 > 0; diff at n: 8.5 - 10.0 < 0
        let closes = vec![10.0, 10.0, 10.0, 10.0, 13.0, 13.0, 4.0];
        assert_eq!(classify(&closes, &small(2, 4)), TrendLabel::BearishCrossover);
    }

    #[test]
    fn bullish_crossover_default_windows() {
        // n-1: short 9.05 < long 9.905; n: short 10.55 > long 10.055
        let mut closes = vec![10.0; 200];
        closes.extend(std::iter::repeat(9.0).take(19));
        closes.push(40.0);
        assert_eq!(
            classify(&closes, &TrendConfig::default()),
            TrendLabel::BullishCrossover
        );
    }

    #[test]
    fn crossover_disabled_falls_back_to_ordering() {
        let closes = vec![4.0, 4.0, 4.0, 4.0, 1.0, 1.0, 10.0];
        let cfg = TrendConfig {
            detect_crossover: false,
            ..small(2, 4)
        };
        assert_eq!(classify(&closes, &cfg), TrendLabel::Bullish);
    }

    #[test]
    fn no_crossover_without_previous_long_average() {
        // Exactly `long` closes: the previous position has no long SMA.
        let closes = vec![4.0, 4.0, 1.0, 10.0];
        assert_eq!(classify(&closes, &small(2, 4)), TrendLabel::Bullish);
    }

    #[test]
    fn leaving_level_is_not_a_crossover() {
        // diff at n-1 is exactly zero, so the move up is plain Bullish.
        let closes = vec![3.0, 3.0, 3.0, 3.0, 9.0];
        assert_eq!(classify(&closes, &small(2, 4)), TrendLabel::Bullish);
    }

    #[test]
    fn non_finite_closes_are_insufficient() {
        let mut closes = vec![100.0; 250];
        closes[240] = f64::NAN;
        assert_eq!(
            classify(&closes, &TrendConfig::default()),
            TrendLabel::InsufficientData
        );
    }

    #[test]
    fn classification_is_idempotent() {
        let closes: Vec<f64> = (0..300)
            .map(|i| 100.0 + (i as f64 * 0.37).sin() * 5.0)
            .collect();
        let cfg = TrendConfig::default();
        let first = analyze(&closes, &cfg);
        let second = analyze(&closes, &cfg);
        assert_eq!(first, second);
    }

    #[test]
    fn required_closes_is_the_larger_window() {
        assert_eq!(TrendConfig::default().required_closes(), 200);
        assert_eq!(small(50, 10).required_closes(), 50);
    }
}
