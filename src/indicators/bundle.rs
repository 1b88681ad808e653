// =============================================================================
// Indicator Bundle — aligned-column calculator
// =============================================================================
//
// Indicator results are never a bare `f64`/`Vec<f64>` union. Each entry is
// explicitly a scalar "latest" value or a series aligned to the window it was
// computed over — callers must pick one, so a series can never be used in a
// boolean context by accident.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::candle::CandleWindow;
use crate::indicators::{adx, atr, bollinger, ema, ichimoku, macd, rsi, volume};

/// Closed set of indicator names a strategy may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IndicatorKey {
    Rsi,
    Rsi2,
    Macd,
    MacdSignal,
    MacdHist,
    Adx,
    Ema8,
    Ema13,
    Ema21,
    Ema50,
    Ema80,
    Ema200,
    BbUpper,
    BbMiddle,
    BbLower,
    Atr,
    IchimokuTenkan,
    IchimokuKijun,
    IchimokuSenkouA,
    IchimokuSenkouB,
    VolumeSma,
}

impl IndicatorKey {
    pub const ALL: [IndicatorKey; 21] = [
        IndicatorKey::Rsi,
        IndicatorKey::Rsi2,
        IndicatorKey::Macd,
        IndicatorKey::MacdSignal,
        IndicatorKey::MacdHist,
        IndicatorKey::Adx,
        IndicatorKey::Ema8,
        IndicatorKey::Ema13,
        IndicatorKey::Ema21,
        IndicatorKey::Ema50,
        IndicatorKey::Ema80,
        IndicatorKey::Ema200,
        IndicatorKey::BbUpper,
        IndicatorKey::BbMiddle,
        IndicatorKey::BbLower,
        IndicatorKey::Atr,
        IndicatorKey::IchimokuTenkan,
        IndicatorKey::IchimokuKijun,
        IndicatorKey::IchimokuSenkouA,
        IndicatorKey::IchimokuSenkouB,
        IndicatorKey::VolumeSma,
    ];

    /// Minimum candle count `compute_bundle` needs to produce a non-empty
    /// value for this indicator, mirroring the length guards in each
    /// `indicators::*::calculate_*` function. Used to gate history loads
    /// before the indicator math ever runs, rather than discovering the
    /// shortfall as a silently-absent bundle entry.
    pub fn min_lookback(self) -> usize {
        match self {
            IndicatorKey::Rsi => 15,
            IndicatorKey::Rsi2 => 3,
            IndicatorKey::Macd | IndicatorKey::MacdSignal | IndicatorKey::MacdHist => 35,
            IndicatorKey::Adx => 29,
            IndicatorKey::Ema8 => 8,
            IndicatorKey::Ema13 => 13,
            IndicatorKey::Ema21 => 21,
            IndicatorKey::Ema50 => 50,
            IndicatorKey::Ema80 => 80,
            IndicatorKey::Ema200 => 200,
            IndicatorKey::BbUpper | IndicatorKey::BbMiddle | IndicatorKey::BbLower => 20,
            IndicatorKey::Atr => 15,
            IndicatorKey::IchimokuTenkan
            | IndicatorKey::IchimokuKijun
            | IndicatorKey::IchimokuSenkouA
            | IndicatorKey::IchimokuSenkouB => 52,
            IndicatorKey::VolumeSma => 20,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            IndicatorKey::Rsi => "rsi",
            IndicatorKey::Rsi2 => "rsi2",
            IndicatorKey::Macd => "macd",
            IndicatorKey::MacdSignal => "macd_signal",
            IndicatorKey::MacdHist => "macd_hist",
            IndicatorKey::Adx => "adx",
            IndicatorKey::Ema8 => "ema8",
            IndicatorKey::Ema13 => "ema13",
            IndicatorKey::Ema21 => "ema21",
            IndicatorKey::Ema50 => "ema50",
            IndicatorKey::Ema80 => "ema80",
            IndicatorKey::Ema200 => "ema200",
            IndicatorKey::BbUpper => "bb_upper",
            IndicatorKey::BbMiddle => "bb_middle",
            IndicatorKey::BbLower => "bb_lower",
            IndicatorKey::Atr => "atr",
            IndicatorKey::IchimokuTenkan => "ichimoku_tenkan",
            IndicatorKey::IchimokuKijun => "ichimoku_kijun",
            IndicatorKey::IchimokuSenkouA => "ichimoku_senkou_a",
            IndicatorKey::IchimokuSenkouB => "ichimoku_senkou_b",
            IndicatorKey::VolumeSma => "volume_sma",
        }
    }
}

impl fmt::Display for IndicatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IndicatorKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IndicatorKey::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown indicator '{s}'"))
    }
}

impl TryFrom<String> for IndicatorKey {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IndicatorKey> for String {
    fn from(key: IndicatorKey) -> Self {
        key.to_string()
    }
}

/// A single indicator's result: either the latest scalar, or the full
/// window-aligned series. Strategies ask for the shape they need via
/// `IndicatorBundle::scalar`/`series` and get a type error, not a runtime
/// truthiness bug, if they reach for the wrong one.
#[derive(Debug, Clone)]
pub enum IndicatorValue {
    Scalar(f64),
    Series(Vec<f64>),
}

impl IndicatorValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            IndicatorValue::Scalar(v) => Some(*v),
            IndicatorValue::Series(s) => s.last().copied(),
        }
    }

    pub fn as_series(&self) -> Option<&[f64]> {
        match self {
            IndicatorValue::Series(s) => Some(s),
            IndicatorValue::Scalar(_) => None,
        }
    }
}

/// Immutable, per-message map of computed indicators. Produced fresh for
/// every `(symbol, timeframe)` message and discarded after; never persisted.
#[derive(Debug, Clone, Default)]
pub struct IndicatorBundle {
    values: HashMap<IndicatorKey, IndicatorValue>,
}

impl IndicatorBundle {
    pub fn get(&self, key: IndicatorKey) -> Option<&IndicatorValue> {
        self.values.get(&key)
    }

    pub fn scalar(&self, key: IndicatorKey) -> Option<f64> {
        self.values.get(&key).and_then(IndicatorValue::as_scalar)
    }

    pub fn series(&self, key: IndicatorKey) -> Option<&[f64]> {
        self.values.get(&key).and_then(IndicatorValue::as_series)
    }

    pub fn contains(&self, key: IndicatorKey) -> bool {
        self.values.contains_key(&key)
    }
}

#[cfg(test)]
impl IndicatorBundle {
    /// Builds a bundle directly from explicit values, bypassing `compute_bundle`.
    /// Lets strategy unit tests pin exact indicator readings instead of
    /// reverse-engineering a candle series that produces them.
    pub(crate) fn from_values(values: impl IntoIterator<Item = (IndicatorKey, IndicatorValue)>) -> Self {
        Self { values: values.into_iter().collect() }
    }
}

/// The minimum window length the most demanding indicator in `required`
/// needs to produce a value at all. Empty `required` still needs at least
/// one candle to evaluate a strategy against.
pub fn min_window_len(required: &HashSet<IndicatorKey>) -> usize {
    required.iter().map(|k| k.min_lookback()).max().unwrap_or(1)
}

/// Compute the union of `required` indicators over `window`. Each indicator
/// fails softly: if the window is too short, its entry is simply absent.
pub fn compute_bundle(window: &CandleWindow, required: &HashSet<IndicatorKey>) -> IndicatorBundle {
    let closes = window.closes();
    let highs = window.highs();
    let lows = window.lows();
    let volumes = window.volumes();
    let candles = window.candles();

    let mut values = HashMap::new();

    macro_rules! put_scalar {
        ($key:expr, $val:expr) => {
            if required.contains(&$key) {
                if let Some(v) = $val {
                    if v.is_finite() {
                        values.insert($key, IndicatorValue::Scalar(v));
                    }
                }
            }
        };
    }

    if required.contains(&IndicatorKey::Rsi) {
        let series = rsi::calculate_rsi(&closes, 14);
        if let Some(&v) = series.last() {
            values.insert(IndicatorKey::Rsi, IndicatorValue::Scalar(v));
        }
    }
    if required.contains(&IndicatorKey::Rsi2) {
        let series = rsi::calculate_rsi(&closes, 2);
        if let Some(&v) = series.last() {
            values.insert(IndicatorKey::Rsi2, IndicatorValue::Scalar(v));
        }
    }

    let needs_macd = required.contains(&IndicatorKey::Macd)
        || required.contains(&IndicatorKey::MacdSignal)
        || required.contains(&IndicatorKey::MacdHist);
    if needs_macd {
        if let Some(result) = macd::calculate_macd(&closes, 12, 26, 9) {
            if required.contains(&IndicatorKey::Macd) {
                if let Some(&v) = result.macd.last() {
                    values.insert(IndicatorKey::Macd, IndicatorValue::Scalar(v));
                }
            }
            if required.contains(&IndicatorKey::MacdSignal) {
                if let Some(&v) = result.signal.last() {
                    values.insert(IndicatorKey::MacdSignal, IndicatorValue::Scalar(v));
                }
            }
            if required.contains(&IndicatorKey::MacdHist) {
                if required.contains(&IndicatorKey::MacdHist) {
                    values.insert(
                        IndicatorKey::MacdHist,
                        IndicatorValue::Series(result.histogram),
                    );
                }
            }
        }
    }

    put_scalar!(IndicatorKey::Adx, adx::calculate_adx(candles, 14));
    put_scalar!(IndicatorKey::Atr, atr::calculate_atr(candles, 14));

    for (key, period) in [
        (IndicatorKey::Ema8, 8usize),
        (IndicatorKey::Ema13, 13),
        (IndicatorKey::Ema21, 21),
        (IndicatorKey::Ema50, 50),
        (IndicatorKey::Ema80, 80),
        (IndicatorKey::Ema200, 200),
    ] {
        if required.contains(&key) {
            let series = ema::calculate_ema(&closes, period);
            if let Some(&v) = series.last() {
                values.insert(key, IndicatorValue::Scalar(v));
            }
        }
    }

    let needs_bb = required.contains(&IndicatorKey::BbUpper)
        || required.contains(&IndicatorKey::BbMiddle)
        || required.contains(&IndicatorKey::BbLower);
    if needs_bb {
        if let Some(bb) = bollinger::calculate_bollinger(&closes, 20, 2.0) {
            if required.contains(&IndicatorKey::BbUpper) {
                values.insert(IndicatorKey::BbUpper, IndicatorValue::Scalar(bb.upper));
            }
            if required.contains(&IndicatorKey::BbMiddle) {
                values.insert(IndicatorKey::BbMiddle, IndicatorValue::Scalar(bb.middle));
            }
            if required.contains(&IndicatorKey::BbLower) {
                values.insert(IndicatorKey::BbLower, IndicatorValue::Scalar(bb.lower));
            }
        }
    }

    let needs_ichimoku = required.contains(&IndicatorKey::IchimokuTenkan)
        || required.contains(&IndicatorKey::IchimokuKijun)
        || required.contains(&IndicatorKey::IchimokuSenkouA)
        || required.contains(&IndicatorKey::IchimokuSenkouB);
    if needs_ichimoku {
        if let Some(ich) = ichimoku::calculate_ichimoku(&highs, &lows) {
            if required.contains(&IndicatorKey::IchimokuTenkan) {
                values.insert(IndicatorKey::IchimokuTenkan, IndicatorValue::Scalar(ich.tenkan));
            }
            if required.contains(&IndicatorKey::IchimokuKijun) {
                values.insert(IndicatorKey::IchimokuKijun, IndicatorValue::Scalar(ich.kijun));
            }
            if required.contains(&IndicatorKey::IchimokuSenkouA) {
                values.insert(
                    IndicatorKey::IchimokuSenkouA,
                    IndicatorValue::Scalar(ich.senkou_a),
                );
            }
            if required.contains(&IndicatorKey::IchimokuSenkouB) {
                values.insert(
                    IndicatorKey::IchimokuSenkouB,
                    IndicatorValue::Scalar(ich.senkou_b),
                );
            }
        }
    }

    if required.contains(&IndicatorKey::VolumeSma) {
        let series = volume::calculate_volume_sma(&volumes, 20);
        if let Some(&v) = series.last() {
            values.insert(IndicatorKey::VolumeSma, IndicatorValue::Scalar(v));
        }
    }

    IndicatorBundle { values }
}
