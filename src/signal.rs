// =============================================================================
// Signal — the engine's central output
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{Action, OrderType, Strength, TimeInForce, Timeframe};

pub const STRATEGY_MODE_DETERMINISTIC: &str = "deterministic";
pub const SIGNAL_SOURCE: &str = "ta_bot";

/// A structured trading instruction produced by a strategy and, in most
/// cases, enriched by the Engine before publication. Immutable once the
/// Engine's enrichment step has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub strategy_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub action: Action,
    pub confidence: f64,
    pub current_price: f64,
    pub price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub strategy_mode: String,
    pub strength: Strength,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub position_size_pct: f64,
    pub metadata: HashMap<String, Value>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Builder used by strategies: only the fields a strategy is obligated to
/// set are required; risk fields are left `None` for the Engine to enrich.
pub struct SignalDraft {
    pub strategy_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub action: Action,
    pub confidence: f64,
    pub price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub metadata: HashMap<String, Value>,
}

impl SignalDraft {
    pub fn new(
        strategy_id: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        action: Action,
        confidence: f64,
        price: f64,
    ) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
            timeframe,
            action,
            confidence,
            price,
            stop_loss: None,
            take_profit: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_risk(mut self, stop_loss: f64, take_profit: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Finalize into a `Signal` with Engine-level defaults applied for
    /// fields strategies never set directly (`order_type`, `time_in_force`,
    /// `position_size_pct`, `strength`). Risk enrichment happens later, in
    /// the Engine, not here.
    pub fn finalize(self, now: DateTime<Utc>) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            strategy_id: self.strategy_id,
            symbol: self.symbol,
            timeframe: self.timeframe,
            action: self.action,
            confidence: self.confidence,
            current_price: self.price,
            price: self.price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            strategy_mode: STRATEGY_MODE_DETERMINISTIC.to_string(),
            strength: Strength::from_confidence(self.confidence),
            order_type: OrderType::default(),
            time_in_force: TimeInForce::default(),
            position_size_pct: 0.1,
            metadata: self.metadata,
            source: SIGNAL_SOURCE.to_string(),
            timestamp: now,
        }
    }
}

impl Signal {
    /// Whether risk bounds sit on the correct side of price for this
    /// signal's action. Both fields must be present to evaluate.
    pub fn risk_bounds_valid(&self) -> bool {
        match (self.stop_loss, self.take_profit) {
            (Some(sl), Some(tp)) => match self.action {
                Action::Buy => sl < self.price && self.price < tp,
                Action::Sell => tp < self.price && self.price < sl,
                Action::Hold => true,
            },
            _ => false,
        }
    }

    /// Reward-to-risk ratio; `None` if either leg is missing or risk is zero.
    pub fn reward_risk_ratio(&self) -> Option<f64> {
        let (sl, tp) = (self.stop_loss?, self.take_profit?);
        let risk = (self.price - sl).abs();
        if risk == 0.0 {
            return None;
        }
        Some((tp - self.price).abs() / risk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_finalize_sets_defaults() {
        let draft = SignalDraft::new("momentum_pulse", "BTCUSDT", Timeframe::M15, Action::Buy, 0.74, 50000.0);
        let signal = draft.finalize(Utc::now());
        assert_eq!(signal.strategy_mode, STRATEGY_MODE_DETERMINISTIC);
        assert_eq!(signal.source, SIGNAL_SOURCE);
        assert_eq!(signal.order_type, OrderType::Market);
        assert_eq!(signal.time_in_force, TimeInForce::GTC);
        assert!((signal.position_size_pct - 0.1).abs() < 1e-12);
        assert_eq!(signal.strength, Strength::Medium);
    }

    #[test]
    fn risk_bounds_valid_for_buy() {
        let signal = SignalDraft::new("s", "BTCUSDT", Timeframe::M15, Action::Buy, 0.8, 100.0)
            .with_risk(96.0, 106.0)
            .finalize(Utc::now());
        assert!(signal.risk_bounds_valid());
        assert_eq!(signal.reward_risk_ratio(), Some(1.5));
    }

    #[test]
    fn risk_bounds_invalid_when_flipped() {
        let signal = SignalDraft::new("s", "BTCUSDT", Timeframe::M15, Action::Sell, 0.8, 100.0)
            .with_risk(96.0, 106.0)
            .finalize(Utc::now());
        assert!(!signal.risk_bounds_valid());
    }
}
