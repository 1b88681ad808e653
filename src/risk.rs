// =============================================================================
// Risk enrichment — stop-loss / take-profit defaults
// =============================================================================
//
// Applied by the Engine to any surviving signal that didn't already carry
// risk bounds. ATR-based sizing is preferred; percentage-of-price is the
// fallback when ATR is unavailable for the window.

use crate::signal::Signal;
use crate::types::Action;

#[derive(Debug, Clone, Copy)]
pub struct RiskDefaults {
    pub atr_stop_loss_multiplier: f64,
    pub atr_take_profit_multiplier: f64,
    pub default_stop_loss_pct: f64,
    pub default_take_profit_pct: f64,
}

impl Default for RiskDefaults {
    fn default() -> Self {
        Self {
            atr_stop_loss_multiplier: 2.0,
            atr_take_profit_multiplier: 3.0,
            default_stop_loss_pct: 0.02,
            default_take_profit_pct: 0.05,
        }
    }
}

/// Enrich `signal` in place with stop-loss/take-profit if either is unset.
/// Sets `metadata.stop_loss_calculated = true` only when the Engine, not the
/// strategy, computed the values.
pub fn enrich(signal: &mut Signal, atr: Option<f64>, defaults: RiskDefaults) {
    if signal.stop_loss.is_some() && signal.take_profit.is_some() {
        return;
    }

    let price = signal.price;
    let (sl_dist, tp_dist) = match atr {
        Some(atr) if atr.is_finite() && atr > 0.0 => (
            atr * defaults.atr_stop_loss_multiplier,
            atr * defaults.atr_take_profit_multiplier,
        ),
        _ => (
            price * defaults.default_stop_loss_pct,
            price * defaults.default_take_profit_pct,
        ),
    };

    let (stop_loss, take_profit) = match signal.action {
        Action::Buy => (price - sl_dist, price + tp_dist),
        Action::Sell => (price + sl_dist, price - tp_dist),
        Action::Hold => (price - sl_dist, price + tp_dist),
    };

    signal.stop_loss = Some(stop_loss);
    signal.take_profit = Some(take_profit);
    signal
        .metadata
        .insert("stop_loss_calculated".to_string(), serde_json::json!(true));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalDraft;
    use crate::types::Timeframe;
    use chrono::Utc;

    #[test]
    fn atr_based_enrichment_scenario_d() {
        let mut signal = SignalDraft::new("s", "BTCUSDT", Timeframe::M15, Action::Buy, 0.8, 100.0)
            .finalize(Utc::now());
        enrich(&mut signal, Some(2.0), RiskDefaults::default());
        assert_eq!(signal.stop_loss, Some(96.0));
        assert_eq!(signal.take_profit, Some(106.0));
        assert_eq!(
            signal.metadata.get("stop_loss_calculated"),
            Some(&serde_json::json!(true))
        );
    }

    #[test]
    fn percentage_fallback_when_atr_absent() {
        let mut signal = SignalDraft::new("s", "BTCUSDT", Timeframe::M15, Action::Sell, 0.8, 100.0)
            .finalize(Utc::now());
        enrich(&mut signal, None, RiskDefaults::default());
        assert_eq!(signal.stop_loss, Some(102.0));
        assert_eq!(signal.take_profit, Some(95.0));
    }

    #[test]
    fn does_not_overwrite_strategy_supplied_risk() {
        let mut signal = SignalDraft::new("s", "BTCUSDT", Timeframe::M15, Action::Buy, 0.8, 100.0)
            .with_risk(90.0, 120.0)
            .finalize(Utc::now());
        enrich(&mut signal, Some(2.0), RiskDefaults::default());
        assert_eq!(signal.stop_loss, Some(90.0));
        assert_eq!(signal.take_profit, Some(120.0));
        assert!(!signal.metadata.contains_key("stop_loss_calculated"));
    }
}
