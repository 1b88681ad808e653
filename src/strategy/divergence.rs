// =============================================================================
// Divergence family
// =============================================================================
//
// Detect divergence between price swings and RSI: price makes a lower low
// while RSI makes a higher low (bullish), or price makes a higher high while
// RSI makes a lower high (bearish). Requires trend-side confirmation from
// ADX to filter noise in a dead-flat market.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::candle::CandleWindow;
use crate::indicators::{rsi::calculate_rsi, IndicatorBundle, IndicatorKey};
use crate::signal::{Signal, SignalDraft};
use crate::strategy::Strategy;
use crate::types::Action;

const SWING_LOOKBACK: usize = 20;

fn default_min_adx() -> f64 {
    15.0
}
fn default_base_confidence() -> f64 {
    0.55
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DivergenceParams {
    #[serde(default = "default_min_adx")]
    min_adx: f64,
    #[serde(default = "default_base_confidence")]
    base_confidence: f64,
}

impl Default for DivergenceParams {
    fn default() -> Self {
        Self {
            min_adx: default_min_adx(),
            base_confidence: default_base_confidence(),
        }
    }
}

/// Index of the minimum (bullish) or maximum (bearish) close within the
/// lookback window, excluding the final bar.
fn swing_index(closes: &[f64], bullish: bool) -> Option<usize> {
    if closes.len() < SWING_LOOKBACK + 1 {
        return None;
    }
    let slice = &closes[closes.len() - SWING_LOOKBACK - 1..closes.len() - 1];
    let offset = closes.len() - SWING_LOOKBACK - 1;
    let idx = if bullish {
        slice
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)?
    } else {
        slice
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)?
    };
    Some(offset + idx)
}

fn analyze_divergence(
    window: &CandleWindow,
    bundle: &IndicatorBundle,
    params: &DivergenceParams,
    strategy_id: &'static str,
    bullish: bool,
) -> Option<Signal> {
    let adx = bundle.scalar(IndicatorKey::Adx)?;
    if adx < params.min_adx {
        return None;
    }

    let closes = window.closes();
    let rsi_series = calculate_rsi(&closes, 14);
    if rsi_series.len() < SWING_LOOKBACK + 1 {
        return None;
    }

    let swing_idx = swing_index(&closes, bullish)?;
    // Align the RSI series (shorter, offset by `period`) to the close index.
    let rsi_offset = closes.len() - rsi_series.len();
    if swing_idx < rsi_offset {
        return None;
    }
    let swing_rsi = rsi_series[swing_idx - rsi_offset];
    let last_rsi = *rsi_series.last()?;
    let last_close = *closes.last()?;
    let swing_close = closes[swing_idx];

    let diverges = if bullish {
        last_close < swing_close && last_rsi > swing_rsi
    } else {
        last_close > swing_close && last_rsi < swing_rsi
    };
    if !diverges {
        return None;
    }

    let action = if bullish { Action::Buy } else { Action::Sell };
    let rsi_gap = (last_rsi - swing_rsi).abs();
    let confidence = (params.base_confidence + (rsi_gap / 100.0)).min(0.95);

    let last = window.last();
    let draft = SignalDraft::new(strategy_id, &last.symbol, window.timeframe(), action, confidence, last.close)
        .with_metadata("rsi", last_rsi)
        .with_metadata("swing_rsi", swing_rsi)
        .with_metadata("adx", adx);

    Some(draft.finalize(Utc::now()))
}

pub struct RsiBullishDivergence;

impl Strategy for RsiBullishDivergence {
    fn id(&self) -> &'static str {
        "rsi_bullish_divergence"
    }

    fn required_indicators(&self) -> HashSet<IndicatorKey> {
        [IndicatorKey::Adx].into_iter().collect()
    }

    fn analyze(&self, window: &CandleWindow, bundle: &IndicatorBundle, params: &Value) -> Option<Signal> {
        let params: DivergenceParams = serde_json::from_value(params.clone()).unwrap_or_default();
        analyze_divergence(window, bundle, &params, self.id(), true)
    }
}

pub struct RsiBearishDivergence;

impl Strategy for RsiBearishDivergence {
    fn id(&self) -> &'static str {
        "rsi_bearish_divergence"
    }

    fn required_indicators(&self) -> HashSet<IndicatorKey> {
        [IndicatorKey::Adx].into_iter().collect()
    }

    fn analyze(&self, window: &CandleWindow, bundle: &IndicatorBundle, params: &Value) -> Option<Signal> {
        let params: DivergenceParams = serde_json::from_value(params.clone()).unwrap_or_default();
        analyze_divergence(window, bundle, &params, self.id(), false)
    }
}
