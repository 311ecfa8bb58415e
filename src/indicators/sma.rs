// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// Unweighted mean of the last `period` closes:
//
//   SMA_i = (close_{i-period+1} + ... + close_i) / period
//
// SMA_i is undefined for i < period - 1. The series is computed with a running
// sum so the whole vector costs O(n) regardless of the window size.
// =============================================================================

/// Compute the SMA series for `closes` and look-back `period`.
///
/// Returns an empty `Vec` when the input is too short or the period is zero.
/// Element `j` of the output corresponds to close index `j + period - 1`.
///
/// # Edge cases
/// - `period == 0` => empty vec
/// - `closes.len() < period` => empty vec
/// - A non-finite mean stops the series; later positions are treated as
///   undefined by callers.
pub fn calculate_sma(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let window = period as f64;
    let mut sum: f64 = closes[..period].iter().sum();
    if !(sum / window).is_finite() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(closes.len() - period + 1);
    result.push(sum / window);

    for i in period..closes.len() {
        sum += closes[i] - closes[i - period];
        let mean = sum / window;
        if !mean.is_finite() {
            break;
        }
        result.push(mean);
    }

    result
}

/// SMA value at close index `index`, or `None` when it is undefined there.
///
/// Computed directly from the window so the result does not carry the
/// floating-point drift of a long running sum.
pub fn sma_at(closes: &[f64], period: usize, index: usize) -> Option<f64> {
    if period == 0 || index >= closes.len() || index + 1 < period {
        return None;
    }
    let window = &closes[index + 1 - period..=index];
    let mean = window.iter().sum::<f64>() / period as f64;
    mean.is_finite().then_some(mean)
}

/// SMA aligned to every close: `None` for the first `period - 1` positions.
///
/// Used for chart overlays where each price point needs its matching average.
pub fn sma_aligned(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let series = calculate_sma(closes, period);
    let mut aligned = vec![None; closes.len()];
    if series.is_empty() {
        return aligned;
    }
    let offset = period - 1;
    for (j, value) in series.into_iter().enumerate() {
        aligned[j + offset] = Some(value);
    }
    aligned
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    // ---- calculate_sma ---------------------------------------------------

    #[test]
    fn sma_empty_input() {
        assert!(calculate_sma(&[], 5).is_empty());
    }

    #[test]
    fn sma_period_zero() {
        assert!(calculate_sma(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn sma_insufficient_data() {
        assert!(calculate_sma(&[1.0, 2.0], 3).is_empty());
    }

    #[test]
    fn sma_known_values() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let sma = calculate_sma(&closes, 3);
        assert_eq!(sma.len(), 3);
        for (got, want) in sma.iter().zip([2.0, 3.0, 4.0]) {
            assert!((got - want).abs() < 1e-12, "got {got}, expected {want}");
        }
    }

    #[test]
    fn sma_stops_at_nan() {
        let closes = vec![1.0, 2.0, 3.0, f64::NAN, 5.0];
        let sma = calculate_sma(&closes, 2);
        assert_eq!(sma.len(), 2);
    }

    // ---- sma_at ----------------------------------------------------------

    #[test]
    fn sma_at_undefined_before_window() {
        let closes = vec![10.0, 20.0, 30.0];
        assert_eq!(sma_at(&closes, 3, 1), None);
        assert_eq!(sma_at(&closes, 3, 3), None);
        assert_eq!(sma_at(&closes, 0, 2), None);
    }

    #[test]
    fn sma_at_matches_series() {
        let closes: Vec<f64> = (1..=50).map(|x| (x as f64).sqrt()).collect();
        let series = calculate_sma(&closes, 7);
        for (j, value) in series.iter().enumerate() {
            let direct = sma_at(&closes, 7, j + 6).unwrap();
            assert!((direct - value).abs() < 1e-9);
        }
    }

    #[test]
    fn sma_at_rejects_non_finite() {
        let closes = vec![1.0, f64::INFINITY, 3.0];
        assert_eq!(sma_at(&closes, 2, 1), None);
    }

    // ---- sma_aligned -----------------------------------------------------

    #[test]
    fn aligned_pads_leading_positions() {
        let aligned = sma_aligned(&[2.0, 4.0, 6.0, 8.0], 2);
        assert_eq!(aligned, vec![None, Some(3.0), Some(5.0), Some(7.0)]);
    }

    #[test]
    fn aligned_all_none_when_short() {
        let aligned = sma_aligned(&[1.0, 2.0], 5);
        assert_eq!(aligned, vec![None, None]);
    }
}
