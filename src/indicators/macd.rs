// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line   = EMA(fast) - EMA(slow)
// Signal line = EMA(signal period) of the MACD line
// Histogram   = MACD line - Signal line
//
// Default periods: fast=12, slow=26, signal=9.
// =============================================================================

use super::ema::calculate_ema;

#[derive(Debug, Clone)]
pub struct MacdResult {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// Compute the full MACD line, signal line, and histogram.
///
/// Returns `None` when there is not enough data to seed both the slow EMA
/// and the signal EMA of the MACD line.
///
/// # Edge cases
/// - `closes.len() < slow` => `None`.
/// - Fewer than `signal` MACD points => `None` (signal line cannot be seeded).
pub fn calculate_macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdResult> {
    if fast == 0 || slow == 0 || signal == 0 || fast >= slow {
        return None;
    }
    if closes.len() < slow {
        return None;
    }

    let ema_fast = calculate_ema(closes, fast);
    let ema_slow = calculate_ema(closes, slow);

    // Align both series to the same tail length: ema_fast starts `slow-fast`
    // points earlier than ema_slow.
    let offset = ema_fast.len().checked_sub(ema_slow.len())?;
    let macd_line: Vec<f64> = ema_fast[offset..]
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    if macd_line.len() < signal {
        return None;
    }

    let signal_line = calculate_ema(&macd_line, signal);
    if signal_line.is_empty() {
        return None;
    }

    let macd_tail = &macd_line[macd_line.len() - signal_line.len()..];
    let histogram: Vec<f64> = macd_tail
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| m - s)
        .collect();

    Some(MacdResult {
        macd: macd_tail.to_vec(),
        signal: signal_line,
        histogram,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 12, 26, 9).is_none());
    }

    #[test]
    fn macd_invalid_periods() {
        let closes: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 26, 12, 9).is_none());
        assert!(calculate_macd(&closes, 0, 26, 9).is_none());
    }

    #[test]
    fn macd_histogram_sign_flip_on_trend_reversal() {
        let rising: Vec<f64> = (1..=80).map(|x| x as f64).collect();
        let mut closes = rising.clone();
        let falling: Vec<f64> = (0..40).map(|i| 80.0 - i as f64).collect();
        closes.extend(falling);

        let result = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!(!result.histogram.is_empty());
        // Somewhere in the series the histogram should turn negative after
        // the uptrend rolls over.
        assert!(result.histogram.iter().any(|&h| h < 0.0));
    }

    #[test]
    fn macd_flat_series_near_zero() {
        let closes = vec![100.0; 100];
        let result = calculate_macd(&closes, 12, 26, 9).unwrap();
        for &h in &result.histogram {
            assert!(h.abs() < 1e-9);
        }
    }
}
