// =============================================================================
// Candlestick-pattern family
// =============================================================================
//
// Pattern detection over the last 2-3 bars, gated by trend filters: hammer
// reversal and the "fox trap" false-break reversal.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::candle::{Candle, CandleWindow};
use crate::indicators::{IndicatorBundle, IndicatorKey};
use crate::signal::{Signal, SignalDraft};
use crate::strategy::Strategy;
use crate::types::Action;

fn default_wick_body_ratio() -> f64 {
    2.0
}
fn default_base_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CandlestickParams {
    #[serde(default = "default_wick_body_ratio")]
    wick_body_ratio: f64,
    #[serde(default = "default_base_confidence")]
    base_confidence: f64,
}

impl Default for CandlestickParams {
    fn default() -> Self {
        Self {
            wick_body_ratio: default_wick_body_ratio(),
            base_confidence: default_base_confidence(),
        }
    }
}

fn body(c: &Candle) -> f64 {
    (c.close - c.open).abs()
}

fn lower_wick(c: &Candle) -> f64 {
    c.open.min(c.close) - c.low
}

fn upper_wick(c: &Candle) -> f64 {
    c.high - c.open.max(c.close)
}

pub struct HammerReversal;

impl Strategy for HammerReversal {
    fn id(&self) -> &'static str {
        "hammer_reversal"
    }

    fn required_indicators(&self) -> HashSet<IndicatorKey> {
        [IndicatorKey::Ema50].into_iter().collect()
    }

    fn analyze(&self, window: &CandleWindow, bundle: &IndicatorBundle, params: &Value) -> Option<Signal> {
        let params: CandlestickParams = serde_json::from_value(params.clone()).unwrap_or_default();

        let ema50 = bundle.scalar(IndicatorKey::Ema50)?;
        let last = window.last();
        let downtrend = last.close < ema50;
        if !downtrend {
            return None;
        }

        let b = body(last).max(1e-9);
        let lw = lower_wick(last);
        let uw = upper_wick(last);
        let is_hammer = lw >= b * params.wick_body_ratio && uw <= b * 0.5;
        if !is_hammer {
            return None;
        }

        let confidence = (params.base_confidence + (lw / b).min(5.0) * 0.05).min(0.9);
        let draft = SignalDraft::new(self.id(), &last.symbol, window.timeframe(), Action::Buy, confidence, last.close)
            .with_metadata("lower_wick", lw)
            .with_metadata("body", b);

        Some(draft.finalize(Utc::now()))
    }
}

pub struct FoxTrapReversal;

impl Strategy for FoxTrapReversal {
    fn id(&self) -> &'static str {
        "fox_trap_reversal"
    }

    fn required_indicators(&self) -> HashSet<IndicatorKey> {
        HashSet::new()
    }

    fn analyze(&self, window: &CandleWindow, _bundle: &IndicatorBundle, params: &Value) -> Option<Signal> {
        let params: CandlestickParams = serde_json::from_value(params.clone()).unwrap_or_default();
        let candles = window.candles();
        if candles.len() < 12 {
            return None;
        }

        let recent = &candles[candles.len() - 11..candles.len() - 1];
        let last = window.last();

        let range_low = recent.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let range_high = recent.iter().map(|c| c.high).fold(f64::MIN, f64::max);

        // A "fox trap" false break below the range, followed immediately by
        // a close back inside and above the range low: a trapped-short
        // reversal. Mirrored for the bearish case above the range high.
        let bullish_trap = last.low < range_low && last.close > range_low;
        let bearish_trap = last.high > range_high && last.close < range_high;

        let action = if bullish_trap {
            Action::Buy
        } else if bearish_trap {
            Action::Sell
        } else {
            return None;
        };

        let penetration = match action {
            Action::Buy => (range_low - last.low) / range_low.max(f64::EPSILON),
            Action::Sell => (last.high - range_high) / range_high.max(f64::EPSILON),
            Action::Hold => 0.0,
        };
        let confidence = (params.base_confidence + penetration * 10.0).min(0.9);

        let draft = SignalDraft::new(self.id(), &last.symbol, window.timeframe(), action, confidence, last.close)
            .with_metadata("range_low", range_low)
            .with_metadata("range_high", range_high);

        Some(draft.finalize(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorValue;
    use crate::types::Timeframe;

    fn window_with_last(build_last: impl FnOnce(i64) -> Candle, n: usize) -> CandleWindow {
        let step = Timeframe::M15.duration_ms();
        let mut candles: Vec<Candle> = (0..n)
            .map(|i| {
                let base = 100.0;
                Candle::new("BTCUSDT", Timeframe::M15, i as i64 * step, base, base + 1.0, base - 1.0, base, 10.0)
                    .unwrap()
            })
            .collect();
        candles.push(build_last(n as i64 * step));
        CandleWindow::new(candles).unwrap()
    }

    #[test]
    fn hammer_detected_in_downtrend() {
        // Pin EMA50 directly rather than deriving it from a candle run: the
        // only thing `HammerReversal` needs from the bundle is a downtrend
        // gate (`close < ema50`), so a hand-picked scalar well above the
        // hammer candle's close exercises that gate deterministically.
        let hammer = Candle::new("BTCUSDT", Timeframe::M15, 0, 100.0, 100.6, 90.0, 100.5, 10.0).unwrap();
        let window = CandleWindow::new(vec![hammer]).unwrap();
        let bundle = IndicatorBundle::from_values([(IndicatorKey::Ema50, IndicatorValue::Scalar(150.0))]);

        let signal = HammerReversal.analyze(&window, &bundle, &Value::Null).expect("downtrend + hammer shape both hold");
        assert_eq!(signal.action, Action::Buy);
        assert!((signal.confidence - 0.75).abs() < 1e-9);
        assert_eq!(signal.metadata.get("lower_wick"), Some(&serde_json::json!(10.0)));
        assert_eq!(signal.metadata.get("body"), Some(&serde_json::json!(0.5)));
    }

    #[test]
    fn fox_trap_bullish() {
        let window = window_with_last(
            |t| Candle::new("BTCUSDT", Timeframe::M15, t, 100.0, 100.5, 94.0, 100.2, 10.0).unwrap(),
            15,
        );
        let bundle = IndicatorBundle::default();
        let signal = FoxTrapReversal.analyze(&window, &bundle, &Value::Null);
        assert!(signal.is_some());
        assert_eq!(signal.unwrap().action, Action::Buy);
    }
}
