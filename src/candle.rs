// =============================================================================
// Candle & Candle Window
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::HistoryError;
use crate::types::Timeframe;

/// An immutable OHLCV bar. Invariants (`low <= open,close <= high`,
/// `volume >= 0`) are enforced at construction — once built, a `Candle` is
/// always valid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, String> {
        if low > open || low > close || open > high || close > high {
            return Err(format!(
                "candle invariant violated: low={low} open={open} close={close} high={high}"
            ));
        }
        if volume < 0.0 {
            return Err(format!("candle volume must be non-negative, got {volume}"));
        }
        Ok(Self {
            symbol: symbol.into(),
            timeframe,
            open_time,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// An ordered, gap-free sequence of candles for a single `(symbol,
/// timeframe)`. Construction is the only place gaps and ordering are
/// checked; once built, callers may assume a clean window.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: Vec<Candle>,
}

impl CandleWindow {
    /// Build a window from candles already in ascending `open_time` order.
    /// Rejects empty input, out-of-order candles, mixed symbol/timeframe,
    /// and gaps inconsistent with the timeframe's duration.
    pub fn new(candles: Vec<Candle>) -> Result<Self, HistoryError> {
        if candles.is_empty() {
            return Err(HistoryError::InsufficientData {
                symbol: String::new(),
                timeframe: String::new(),
                available: 0,
                required: 1,
            });
        }

        let symbol = candles[0].symbol.clone();
        let timeframe = candles[0].timeframe;
        let step = timeframe.duration_ms();

        for pair in candles.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.symbol != symbol || next.symbol != symbol {
                return Err(HistoryError::GappedWindow {
                    symbol,
                    timeframe: timeframe.to_string(),
                    at: next.open_time,
                });
            }
            if prev.timeframe != timeframe || next.timeframe != timeframe {
                return Err(HistoryError::GappedWindow {
                    symbol,
                    timeframe: timeframe.to_string(),
                    at: next.open_time,
                });
            }
            if next.open_time <= prev.open_time {
                return Err(HistoryError::GappedWindow {
                    symbol,
                    timeframe: timeframe.to_string(),
                    at: next.open_time,
                });
            }
            if next.open_time - prev.open_time != step {
                return Err(HistoryError::GappedWindow {
                    symbol,
                    timeframe: timeframe.to_string(),
                    at: next.open_time,
                });
            }
        }

        Ok(Self { candles })
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }

    pub fn last(&self) -> &Candle {
        self.candles.last().expect("CandleWindow is never empty")
    }

    pub fn symbol(&self) -> &str {
        &self.last().symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.last().timeframe
    }

    /// Require at least `min_len` candles, for the most demanding enabled
    /// strategy's minimum history requirement.
    pub fn require_min_len(&self, min_len: usize) -> Result<(), HistoryError> {
        if self.candles.len() < min_len {
            return Err(HistoryError::InsufficientData {
                symbol: self.symbol().to_string(),
                timeframe: self.timeframe().to_string(),
                available: self.candles.len(),
                required: min_len,
            });
        }
        Ok(())
    }
}
