// =============================================================================
// Ichimoku Kinko Hyo (selected components)
// =============================================================================
//
// Tenkan-sen (conversion line)  = (9-period high + 9-period low) / 2
// Kijun-sen (base line)         = (26-period high + 26-period low) / 2
// Senkou Span A (leading span)  = (Tenkan + Kijun) / 2, plotted 26 ahead
// Senkou Span B                 = (52-period high + 52-period low) / 2, plotted 26 ahead
//
// Displacement (the forward-plotting of the Senkou spans) is not modeled
// here — strategies consume the spans as of the current bar, which is the
// projection they are stamped with, not a shifted series.
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct IchimokuResult {
    pub tenkan: f64,
    pub kijun: f64,
    pub senkou_a: f64,
    pub senkou_b: f64,
}

fn midpoint(highs: &[f64], lows: &[f64], period: usize) -> Option<f64> {
    if highs.len() < period || lows.len() < period {
        return None;
    }
    let h = highs[highs.len() - period..]
        .iter()
        .cloned()
        .fold(f64::MIN, f64::max);
    let l = lows[lows.len() - period..]
        .iter()
        .cloned()
        .fold(f64::MAX, f64::min);
    Some((h + l) / 2.0)
}

/// Compute the latest Ichimoku components from aligned high/low series.
///
/// Returns `None` if there is not enough history for the 52-period Senkou
/// Span B, the longest lookback among the four components.
pub fn calculate_ichimoku(highs: &[f64], lows: &[f64]) -> Option<IchimokuResult> {
    let tenkan = midpoint(highs, lows, 9)?;
    let kijun = midpoint(highs, lows, 26)?;
    let senkou_b = midpoint(highs, lows, 52)?;
    let senkou_a = (tenkan + kijun) / 2.0;

    if !(tenkan.is_finite() && kijun.is_finite() && senkou_a.is_finite() && senkou_b.is_finite()) {
        return None;
    }

    Some(IchimokuResult {
        tenkan,
        kijun,
        senkou_a,
        senkou_b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: usize, start: f64) -> (Vec<f64>, Vec<f64>) {
        let highs: Vec<f64> = (0..n).map(|i| start + i as f64 + 1.0).collect();
        let lows: Vec<f64> = (0..n).map(|i| start + i as f64 - 1.0).collect();
        (highs, lows)
    }

    #[test]
    fn ichimoku_insufficient_data() {
        let (highs, lows) = series(30, 100.0);
        assert!(calculate_ichimoku(&highs, &lows).is_none());
    }

    #[test]
    fn ichimoku_computes_all_components() {
        let (highs, lows) = series(60, 100.0);
        let result = calculate_ichimoku(&highs, &lows).unwrap();
        assert!(result.tenkan.is_finite());
        assert!(result.kijun.is_finite());
        assert!(result.senkou_a.is_finite());
        assert!(result.senkou_b.is_finite());
    }

    #[test]
    fn ichimoku_senkou_a_is_average_of_tenkan_kijun() {
        let (highs, lows) = series(60, 100.0);
        let result = calculate_ichimoku(&highs, &lows).unwrap();
        assert!((result.senkou_a - (result.tenkan + result.kijun) / 2.0).abs() < 1e-9);
    }
}
