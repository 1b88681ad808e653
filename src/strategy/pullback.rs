// =============================================================================
// Pullback-to-trend family
// =============================================================================
//
// In an established trend (long EMAs aligned), trigger when price touches a
// mid-length EMA. Confidence scales with trend quality (EMA spread, ADX).

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::candle::CandleWindow;
use crate::indicators::{IndicatorBundle, IndicatorKey};
use crate::signal::{Signal, SignalDraft};
use crate::strategy::Strategy;
use crate::types::Action;

fn default_touch_tolerance_pct() -> f64 {
    0.3
}
fn default_base_confidence() -> f64 {
    0.55
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PullbackParams {
    #[serde(default = "default_touch_tolerance_pct")]
    touch_tolerance_pct: f64,
    #[serde(default = "default_base_confidence")]
    base_confidence: f64,
}

impl Default for PullbackParams {
    fn default() -> Self {
        Self {
            touch_tolerance_pct: default_touch_tolerance_pct(),
            base_confidence: default_base_confidence(),
        }
    }
}

fn analyze_pullback(
    window: &CandleWindow,
    bundle: &IndicatorBundle,
    params: &PullbackParams,
    strategy_id: &'static str,
) -> Option<Signal> {
    let ema21 = bundle.scalar(IndicatorKey::Ema21)?;
    let ema50 = bundle.scalar(IndicatorKey::Ema50)?;
    let ema200 = bundle.scalar(IndicatorKey::Ema200)?;
    let adx = bundle.scalar(IndicatorKey::Adx).unwrap_or(0.0);
    let last = window.last();
    let price = last.close;

    let bullish_trend = ema21 > ema50 && ema50 > ema200;
    let bearish_trend = ema21 < ema50 && ema50 < ema200;
    if !bullish_trend && !bearish_trend {
        return None;
    }

    let tolerance = ema21 * (params.touch_tolerance_pct / 100.0);
    let touches_ema21 = (price - ema21).abs() <= tolerance || (last.low <= ema21 && last.high >= ema21);
    if !touches_ema21 {
        return None;
    }

    let action = if bullish_trend { Action::Buy } else { Action::Sell };

    let spread = (ema21 - ema200).abs() / ema200.max(f64::EPSILON);
    let mut confidence = params.base_confidence + spread.min(0.2);
    if adx > 25.0 {
        confidence += 0.1;
    }
    confidence = confidence.min(0.95);

    let draft = SignalDraft::new(strategy_id, &last.symbol, window.timeframe(), action, confidence, price)
        .with_metadata("ema21", ema21)
        .with_metadata("ema50", ema50)
        .with_metadata("adx", adx);

    Some(draft.finalize(Utc::now()))
}

pub struct Ema21PullbackContinuation;

impl Strategy for Ema21PullbackContinuation {
    fn id(&self) -> &'static str {
        "ema21_pullback_continuation"
    }

    fn required_indicators(&self) -> HashSet<IndicatorKey> {
        [
            IndicatorKey::Ema21,
            IndicatorKey::Ema50,
            IndicatorKey::Ema200,
            IndicatorKey::Adx,
        ]
        .into_iter()
        .collect()
    }

    fn analyze(&self, window: &CandleWindow, bundle: &IndicatorBundle, params: &Value) -> Option<Signal> {
        let params: PullbackParams = serde_json::from_value(params.clone()).unwrap_or_default();
        analyze_pullback(window, bundle, &params, self.id())
    }
}

pub struct Ema21PullbackTight;

impl Strategy for Ema21PullbackTight {
    fn id(&self) -> &'static str {
        "ema21_pullback_tight"
    }

    fn required_indicators(&self) -> HashSet<IndicatorKey> {
        [
            IndicatorKey::Ema21,
            IndicatorKey::Ema50,
            IndicatorKey::Ema200,
            IndicatorKey::Adx,
        ]
        .into_iter()
        .collect()
    }

    fn analyze(&self, window: &CandleWindow, bundle: &IndicatorBundle, params: &Value) -> Option<Signal> {
        let mut params: PullbackParams = serde_json::from_value(params.clone()).unwrap_or_default();
        if params.touch_tolerance_pct == default_touch_tolerance_pct() {
            params.touch_tolerance_pct = 0.1;
        }
        if params.base_confidence == default_base_confidence() {
            params.base_confidence = 0.65;
        }
        analyze_pullback(window, bundle, &params, self.id())
    }
}
