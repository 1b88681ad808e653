// =============================================================================
// Rolling Volume Mean
// =============================================================================
//
// A simple moving average of volume, used by the breakout family to detect a
// volume surge confirming a range break (current volume >= multiplier * SMA).
// =============================================================================

/// Compute the rolling simple moving average of `volumes` over `period`.
///
/// Returns an empty vec when `period` is zero or there is insufficient data,
/// matching the other indicators' soft-fail convention.
pub fn calculate_volume_sma(volumes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || volumes.len() < period {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(volumes.len() - period + 1);
    let mut window_sum: f64 = volumes[..period].iter().sum();
    result.push(window_sum / period as f64);

    for i in period..volumes.len() {
        window_sum += volumes[i] - volumes[i - period];
        result.push(window_sum / period as f64);
    }

    result
}

/// Whether the most recent volume is a "surge" relative to its rolling mean.
pub fn is_volume_surge(volumes: &[f64], period: usize, multiplier: f64) -> bool {
    let sma = calculate_volume_sma(volumes, period);
    match (sma.last(), volumes.last()) {
        (Some(&mean), Some(&latest)) if mean > 0.0 => latest >= mean * multiplier,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_sma_empty_on_short_input() {
        assert!(calculate_volume_sma(&[1.0, 2.0], 5).is_empty());
    }

    #[test]
    fn volume_sma_basic() {
        let volumes = vec![10.0, 20.0, 30.0, 40.0];
        let sma = calculate_volume_sma(&volumes, 2);
        assert_eq!(sma, vec![15.0, 25.0, 35.0]);
    }

    #[test]
    fn surge_detected() {
        let mut volumes = vec![10.0; 20];
        volumes.push(30.0);
        assert!(is_volume_surge(&volumes, 20, 1.5));
    }

    #[test]
    fn surge_not_detected_on_flat_volume() {
        let volumes = vec![10.0; 21];
        assert!(!is_volume_surge(&volumes, 20, 1.5));
    }
}
