// =============================================================================
// Volatility-regime family
// =============================================================================
//
// Bollinger squeeze alert: emits `action=hold` diagnostic signals when band
// width contracts below a fraction of the middle band. These are used only
// as metadata by dashboards and must be discarded by the Engine before
// publication — the Engine never publishes a `hold` signal.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::candle::CandleWindow;
use crate::indicators::{IndicatorBundle, IndicatorKey};
use crate::signal::{Signal, SignalDraft};
use crate::strategy::Strategy;
use crate::types::Action;

fn default_squeeze_threshold_pct() -> f64 {
    2.5
}
fn default_base_confidence() -> f64 {
    0.65
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SqueezeParams {
    #[serde(default = "default_squeeze_threshold_pct")]
    squeeze_threshold_pct: f64,
    #[serde(default = "default_base_confidence")]
    base_confidence: f64,
}

impl Default for SqueezeParams {
    fn default() -> Self {
        Self {
            squeeze_threshold_pct: default_squeeze_threshold_pct(),
            base_confidence: default_base_confidence(),
        }
    }
}

fn analyze_squeeze(
    window: &CandleWindow,
    bundle: &IndicatorBundle,
    params: &SqueezeParams,
    strategy_id: &'static str,
) -> Option<Signal> {
    let upper = bundle.scalar(IndicatorKey::BbUpper)?;
    let middle = bundle.scalar(IndicatorKey::BbMiddle)?;
    let lower = bundle.scalar(IndicatorKey::BbLower)?;
    if middle == 0.0 {
        return None;
    }

    let width_pct = (upper - lower) / middle * 100.0;
    if width_pct > params.squeeze_threshold_pct {
        return None;
    }

    let last = window.last();
    let confidence = (params.base_confidence + (params.squeeze_threshold_pct - width_pct) * 0.05).min(0.95);

    let draft = SignalDraft::new(strategy_id, &last.symbol, window.timeframe(), Action::Hold, confidence, last.close)
        .with_metadata("bb_width_pct", width_pct);

    Some(draft.finalize(Utc::now()))
}

pub struct BollingerSqueezeAlert;

impl Strategy for BollingerSqueezeAlert {
    fn id(&self) -> &'static str {
        "bollinger_squeeze_alert"
    }

    fn required_indicators(&self) -> HashSet<IndicatorKey> {
        [IndicatorKey::BbUpper, IndicatorKey::BbMiddle, IndicatorKey::BbLower]
            .into_iter()
            .collect()
    }

    fn analyze(&self, window: &CandleWindow, bundle: &IndicatorBundle, params: &Value) -> Option<Signal> {
        let params: SqueezeParams = serde_json::from_value(params.clone()).unwrap_or_default();
        analyze_squeeze(window, bundle, &params, self.id())
    }
}

pub struct BollingerSqueezeAlertTight;

impl Strategy for BollingerSqueezeAlertTight {
    fn id(&self) -> &'static str {
        "bollinger_squeeze_alert_tight"
    }

    fn required_indicators(&self) -> HashSet<IndicatorKey> {
        [IndicatorKey::BbUpper, IndicatorKey::BbMiddle, IndicatorKey::BbLower]
            .into_iter()
            .collect()
    }

    fn analyze(&self, window: &CandleWindow, bundle: &IndicatorBundle, params: &Value) -> Option<Signal> {
        let mut params: SqueezeParams = serde_json::from_value(params.clone()).unwrap_or_default();
        if params.squeeze_threshold_pct == default_squeeze_threshold_pct() {
            params.squeeze_threshold_pct = 1.2;
        }
        analyze_squeeze(window, bundle, &params, self.id())
    }
}
