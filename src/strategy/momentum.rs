// =============================================================================
// Momentum / trend-following family
// =============================================================================
//
// Trigger on a MACD histogram sign flip plus RSI in a "warm but not extreme"
// band, ADX above a trend-strength threshold, and price above a short EMA
// which is itself above a long EMA (mirrored for sells).

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::candle::CandleWindow;
use crate::indicators::{IndicatorBundle, IndicatorKey};
use crate::signal::{Signal, SignalDraft};
use crate::strategy::Strategy;
use crate::types::Action;

fn default_rsi_buy_lo() -> f64 {
    50.0
}
fn default_rsi_buy_hi() -> f64 {
    65.0
}
fn default_adx_threshold() -> f64 {
    25.0
}
fn default_base_confidence() -> f64 {
    0.6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MomentumParams {
    #[serde(default = "default_rsi_buy_lo")]
    rsi_buy_lo: f64,
    #[serde(default = "default_rsi_buy_hi")]
    rsi_buy_hi: f64,
    #[serde(default = "default_adx_threshold")]
    adx_threshold: f64,
    #[serde(default = "default_base_confidence")]
    base_confidence: f64,
}

impl Default for MomentumParams {
    fn default() -> Self {
        Self {
            rsi_buy_lo: default_rsi_buy_lo(),
            rsi_buy_hi: default_rsi_buy_hi(),
            adx_threshold: default_adx_threshold(),
            base_confidence: default_base_confidence(),
        }
    }
}

fn analyze_momentum(
    window: &CandleWindow,
    bundle: &IndicatorBundle,
    params: &MomentumParams,
    strategy_id: &'static str,
    ema_short_key: IndicatorKey,
    ema_long_key: IndicatorKey,
) -> Option<Signal> {
    let hist = bundle.series(IndicatorKey::MacdHist)?;
    if hist.len() < 2 {
        return None;
    }
    let (prev, curr) = (hist[hist.len() - 2], hist[hist.len() - 1]);

    let rsi = bundle.scalar(IndicatorKey::Rsi)?;
    let adx = bundle.scalar(IndicatorKey::Adx)?;
    let ema_short = bundle.scalar(ema_short_key)?;
    let ema_long = bundle.scalar(ema_long_key)?;
    let price = window.last().close;

    let flipped_up = prev < 0.0 && curr >= 0.0;
    let flipped_down = prev > 0.0 && curr <= 0.0;

    let rsi_span = params.rsi_buy_hi - params.rsi_buy_lo;
    let sell_lo = 100.0 - params.rsi_buy_hi;
    let sell_hi = 100.0 - params.rsi_buy_lo;

    let action = if flipped_up
        && rsi >= params.rsi_buy_lo
        && rsi <= params.rsi_buy_hi
        && adx > params.adx_threshold
        && price > ema_short
        && ema_short > ema_long
    {
        Action::Buy
    } else if flipped_down
        && rsi >= sell_lo
        && rsi <= sell_hi
        && adx > params.adx_threshold
        && price < ema_short
        && ema_short < ema_long
    {
        Action::Sell
    } else {
        return None;
    };

    let mut confidence = params.base_confidence;
    if adx > params.adx_threshold + 10.0 {
        confidence += 0.1;
    }
    if rsi_span > 0.0 {
        let centered = 1.0 - ((rsi - (params.rsi_buy_lo + params.rsi_buy_hi) / 2.0).abs() / (rsi_span / 2.0)).min(1.0);
        confidence += centered * 0.15;
    }
    confidence = confidence.min(0.95);

    let draft = SignalDraft::new(strategy_id, &window.last().symbol, window.timeframe(), action, confidence, price)
        .with_metadata("rsi", rsi)
        .with_metadata("macd_hist", curr)
        .with_metadata("adx", adx);

    Some(draft.finalize(Utc::now()))
}

pub struct MomentumPulse;

impl Strategy for MomentumPulse {
    fn id(&self) -> &'static str {
        "momentum_pulse"
    }

    fn required_indicators(&self) -> HashSet<IndicatorKey> {
        [
            IndicatorKey::MacdHist,
            IndicatorKey::Rsi,
            IndicatorKey::Adx,
            IndicatorKey::Ema21,
            IndicatorKey::Ema50,
        ]
        .into_iter()
        .collect()
    }

    fn analyze(&self, window: &CandleWindow, bundle: &IndicatorBundle, params: &Value) -> Option<Signal> {
        let params: MomentumParams = serde_json::from_value(params.clone()).unwrap_or_default();
        analyze_momentum(
            window,
            bundle,
            &params,
            self.id(),
            IndicatorKey::Ema21,
            IndicatorKey::Ema50,
        )
    }
}

pub struct MomentumPulseAggressive;

impl Strategy for MomentumPulseAggressive {
    fn id(&self) -> &'static str {
        "momentum_pulse_aggressive"
    }

    fn required_indicators(&self) -> HashSet<IndicatorKey> {
        [
            IndicatorKey::MacdHist,
            IndicatorKey::Rsi,
            IndicatorKey::Adx,
            IndicatorKey::Ema13,
            IndicatorKey::Ema50,
        ]
        .into_iter()
        .collect()
    }

    fn analyze(&self, window: &CandleWindow, bundle: &IndicatorBundle, params: &Value) -> Option<Signal> {
        let mut params: MomentumParams = serde_json::from_value(params.clone()).unwrap_or_default();
        // Aggressive variant widens the RSI band and lowers the ADX bar
        // relative to whatever overrides the caller supplied, unless the
        // caller already set their own values explicitly.
        if params.rsi_buy_lo == default_rsi_buy_lo() {
            params.rsi_buy_lo = 45.0;
        }
        if params.rsi_buy_hi == default_rsi_buy_hi() {
            params.rsi_buy_hi = 70.0;
        }
        if params.adx_threshold == default_adx_threshold() {
            params.adx_threshold = 18.0;
        }
        if params.base_confidence == default_base_confidence() {
            params.base_confidence = 0.55;
        }
        analyze_momentum(
            window,
            bundle,
            &params,
            self.id(),
            IndicatorKey::Ema13,
            IndicatorKey::Ema50,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::Candle;
    use crate::indicators::IndicatorValue;
    use crate::types::Timeframe;

    fn window_trending_up(n: usize) -> CandleWindow {
        let step = Timeframe::M15.duration_ms();
        let candles: Vec<Candle> = (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.5;
                Candle::new(
                    "BTCUSDT",
                    Timeframe::M15,
                    i as i64 * step,
                    base,
                    base + 1.0,
                    base - 1.0,
                    base + 0.3,
                    10.0,
                )
                .unwrap()
            })
            .collect();
        CandleWindow::new(candles).unwrap()
    }

    #[test]
    fn momentum_pulse_fires_on_macd_flip_with_confirming_trend() {
        // Built directly from pinned indicator values rather than a candle
        // series: the firing condition is a conjunction of five independent
        // readings, too fixture-sensitive to derive reliably from raw OHLCV
        // without running the indicator math. `IndicatorBundle::from_values`
        // lets the test assert the strategy's own decision boundary exactly.
        let window = CandleWindow::new(vec![Candle::new("BTCUSDT", Timeframe::M15, 0, 109.0, 111.0, 108.0, 110.0, 10.0).unwrap()])
            .unwrap();
        let bundle = IndicatorBundle::from_values([
            (IndicatorKey::MacdHist, IndicatorValue::Series(vec![-1.0, 0.5])),
            (IndicatorKey::Rsi, IndicatorValue::Scalar(60.0)),
            (IndicatorKey::Adx, IndicatorValue::Scalar(30.0)),
            (IndicatorKey::Ema21, IndicatorValue::Scalar(105.0)),
            (IndicatorKey::Ema50, IndicatorValue::Scalar(100.0)),
        ]);

        let signal = MomentumPulse.analyze(&window, &bundle, &Value::Null).expect("all five gates are satisfied");
        assert_eq!(signal.action, Action::Buy);
        assert!((signal.confidence - 0.7).abs() < 1e-9);
        assert_eq!(signal.metadata.get("rsi"), Some(&serde_json::json!(60.0)));
        assert_eq!(signal.metadata.get("macd_hist"), Some(&serde_json::json!(0.5)));
    }

    #[test]
    fn momentum_pulse_returns_none_on_missing_indicators() {
        let window = window_trending_up(10);
        let bundle = IndicatorBundle::default();
        assert!(MomentumPulse.analyze(&window, &bundle, &Value::Null).is_none());
    }
}
