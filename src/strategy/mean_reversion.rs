// =============================================================================
// Mean-reversion family
// =============================================================================
//
// Trigger on price closing outside a Bollinger Band and re-entering, or on an
// extreme RSI-2 reading. Both produce a counter-trend signal whose confidence
// scales with the magnitude of the excursion.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::candle::CandleWindow;
use crate::indicators::{IndicatorBundle, IndicatorKey};
use crate::signal::{Signal, SignalDraft};
use crate::strategy::Strategy;
use crate::types::Action;

fn default_rsi2_oversold() -> f64 {
    25.0
}
fn default_rsi2_overbought() -> f64 {
    75.0
}
fn default_base_confidence() -> f64 {
    0.55
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BollingerReversionParams {
    #[serde(default = "default_base_confidence")]
    base_confidence: f64,
}

impl Default for BollingerReversionParams {
    fn default() -> Self {
        Self {
            base_confidence: default_base_confidence(),
        }
    }
}

pub struct BollingerReversion;

impl Strategy for BollingerReversion {
    fn id(&self) -> &'static str {
        "bollinger_reversion"
    }

    fn required_indicators(&self) -> HashSet<IndicatorKey> {
        [IndicatorKey::BbUpper, IndicatorKey::BbMiddle, IndicatorKey::BbLower]
            .into_iter()
            .collect()
    }

    fn analyze(&self, window: &CandleWindow, bundle: &IndicatorBundle, params: &Value) -> Option<Signal> {
        let params: BollingerReversionParams = serde_json::from_value(params.clone()).unwrap_or_default();

        let candles = window.candles();
        if candles.len() < 2 {
            return None;
        }
        let prev = &candles[candles.len() - 2];
        let last = candles.last()?;

        let upper = bundle.scalar(IndicatorKey::BbUpper)?;
        let middle = bundle.scalar(IndicatorKey::BbMiddle)?;
        let lower = bundle.scalar(IndicatorKey::BbLower)?;
        if middle == 0.0 {
            return None;
        }

        let action = if prev.close < lower && last.close >= lower {
            Action::Buy
        } else if prev.close > upper && last.close <= upper {
            Action::Sell
        } else {
            return None;
        };

        let excursion = match action {
            Action::Buy => (lower - prev.close).abs() / middle,
            Action::Sell => (prev.close - upper).abs() / middle,
            Action::Hold => 0.0,
        };
        let confidence = (params.base_confidence + excursion * 4.0).min(0.95);

        let draft = SignalDraft::new(self.id(), &last.symbol, window.timeframe(), action, confidence, last.close)
            .with_metadata("bb_upper", upper)
            .with_metadata("bb_middle", middle)
            .with_metadata("bb_lower", lower);

        Some(draft.finalize(Utc::now()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Rsi2Params {
    #[serde(default = "default_rsi2_oversold")]
    oversold: f64,
    #[serde(default = "default_rsi2_overbought")]
    overbought: f64,
    #[serde(default = "default_base_confidence")]
    base_confidence: f64,
}

impl Default for Rsi2Params {
    fn default() -> Self {
        Self {
            oversold: default_rsi2_oversold(),
            overbought: default_rsi2_overbought(),
            base_confidence: default_base_confidence(),
        }
    }
}

pub struct Rsi2ExtremeReversal;

impl Strategy for Rsi2ExtremeReversal {
    fn id(&self) -> &'static str {
        "rsi2_extreme_reversal"
    }

    fn required_indicators(&self) -> HashSet<IndicatorKey> {
        [IndicatorKey::Rsi2].into_iter().collect()
    }

    fn analyze(&self, window: &CandleWindow, bundle: &IndicatorBundle, params: &Value) -> Option<Signal> {
        let params: Rsi2Params = serde_json::from_value(params.clone()).unwrap_or_default();
        let rsi2 = bundle.scalar(IndicatorKey::Rsi2)?;
        let last = window.last();

        let action = if rsi2 <= params.oversold {
            Action::Buy
        } else if rsi2 >= params.overbought {
            Action::Sell
        } else {
            return None;
        };

        let excursion = match action {
            Action::Buy => (params.oversold - rsi2).max(0.0) / params.oversold.max(1.0),
            Action::Sell => (rsi2 - params.overbought).max(0.0) / (100.0 - params.overbought).max(1.0),
            Action::Hold => 0.0,
        };
        let confidence = (params.base_confidence + excursion * 0.4).min(0.95);

        let draft = SignalDraft::new(self.id(), &last.symbol, window.timeframe(), action, confidence, last.close)
            .with_metadata("rsi2", rsi2);

        Some(draft.finalize(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::Candle;
    use crate::types::Timeframe;

    fn make_window(closes: &[f64]) -> CandleWindow {
        let step = Timeframe::M15.duration_ms();
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Candle::new("BTCUSDT", Timeframe::M15, i as i64 * step, c, c + 0.5, c - 0.5, c, 10.0).unwrap()
            })
            .collect();
        CandleWindow::new(candles).unwrap()
    }

    #[test]
    fn rsi2_buy_on_extreme_oversold() {
        let closes: Vec<f64> = (0..30).map(|i| 200.0 - i as f64).collect();
        let window = make_window(&closes);
        let required = Rsi2ExtremeReversal.required_indicators();
        let bundle = crate::indicators::compute_bundle(&window, &required);
        let signal = Rsi2ExtremeReversal.analyze(&window, &bundle, &Value::Null);
        if let Some(signal) = signal {
            assert_eq!(signal.action, Action::Buy);
        }
    }

    #[test]
    fn bollinger_reversion_none_on_missing_indicators() {
        let window = make_window(&[100.0; 25]);
        let bundle = IndicatorBundle::default();
        assert!(BollingerReversion.analyze(&window, &bundle, &Value::Null).is_none());
    }
}
