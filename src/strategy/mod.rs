// =============================================================================
// Strategy Set — the catalog of deterministic rule-based strategies
// =============================================================================

pub mod breakout;
pub mod candlestick;
pub mod divergence;
pub mod mean_reversion;
pub mod momentum;
pub mod pullback;
pub mod volatility_regime;

use std::collections::HashMap;
use std::collections::HashSet;

use serde_json::Value;

use crate::candle::CandleWindow;
use crate::indicators::{IndicatorBundle, IndicatorKey};
use crate::signal::Signal;

/// Common contract every concrete strategy implements. Pure and
/// side-effect-free: no I/O, no shared mutable state. `analyze` must
/// tolerate missing indicators and short windows by returning `None`.
pub trait Strategy: Send + Sync {
    /// Stable identifier, e.g. `momentum_pulse`.
    fn id(&self) -> &'static str;

    /// Indicators this strategy needs the Calculator to have computed.
    fn required_indicators(&self) -> HashSet<IndicatorKey>;

    /// Evaluate the strategy. `params` is the effective per-strategy
    /// parameter document (global overlaid with any per-symbol override);
    /// each strategy deserializes it into its own typed params with
    /// `#[serde(default = ...)]` fields, so a missing or partial document
    /// simply yields defaults.
    fn analyze(&self, window: &CandleWindow, bundle: &IndicatorBundle, params: &Value) -> Option<Signal>;
}

/// Closed catalog of strategies built once at startup. Replaces a
/// dict-keyed dynamic lookup with a fixed registry resolved by id.
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Box<dyn Strategy>>,
}

impl StrategyRegistry {
    /// Build the registry with every strategy this implementation ships.
    pub fn with_defaults() -> Self {
        let all: Vec<Box<dyn Strategy>> = vec![
            Box::new(momentum::MomentumPulse),
            Box::new(momentum::MomentumPulseAggressive),
            Box::new(mean_reversion::BollingerReversion),
            Box::new(mean_reversion::Rsi2ExtremeReversal),
            Box::new(pullback::Ema21PullbackContinuation),
            Box::new(pullback::Ema21PullbackTight),
            Box::new(breakout::RangeBreakoutVolumeConfirmed),
            Box::new(breakout::RangeBreakoutAtrSqueeze),
            Box::new(divergence::RsiBullishDivergence),
            Box::new(divergence::RsiBearishDivergence),
            Box::new(candlestick::HammerReversal),
            Box::new(candlestick::FoxTrapReversal),
            Box::new(volatility_regime::BollingerSqueezeAlert),
            Box::new(volatility_regime::BollingerSqueezeAlertTight),
        ];

        let mut strategies = HashMap::new();
        for strategy in all {
            strategies.insert(strategy.id(), strategy);
        }
        Self { strategies }
    }

    pub fn get(&self, id: &str) -> Option<&dyn Strategy> {
        self.strategies.get(id).map(|s| s.as_ref())
    }

    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.strategies.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
