// =============================================================================
// History Loader (C2)
// =============================================================================
//
// Fetches the most recent N closed candles for (symbol, timeframe) from the
// time-series store, ordered ascending by open_time. The store itself is
// modeled as a `CandleStore` trait so the Engine can be exercised against an
// in-memory fake without network I/O; the HTTP-backed implementation mirrors
// a plain-GET request/retry idiom over an exchange-style klines endpoint.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::candle::{Candle, CandleWindow};
use crate::error::HistoryError;
use crate::types::Timeframe;

/// Default candle count requested per fetch, per spec.
pub const DEFAULT_WINDOW_SIZE: usize = 500;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(200);

#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Fetch the most recent `limit` closed candles for `(symbol, timeframe)`,
    /// ending at `end_time` (ms since epoch) or "now" if `None`, ascending by
    /// `open_time`. Implementations should not apply retry logic themselves —
    /// that is `HistoryLoader`'s job — and should return a transport-shaped
    /// error as a plain string so the loader can decide whether to retry.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, String>;
}

/// HTTP-backed `CandleStore`, following the same array-of-arrays klines
/// request/response idiom: a plain GET, `serde_json::Value` parsing of an
/// array-of-arrays kline response, malformed rows skipped with a `warn!`.
pub struct HttpCandleStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCandleStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn parse_str_f64(value: &Value) -> Result<f64, String> {
        match value {
            Value::String(s) => s.parse::<f64>().map_err(|e| format!("invalid numeric field {s}: {e}")),
            Value::Number(n) => n.as_f64().ok_or_else(|| "numeric field out of f64 range".to_string()),
            other => Err(format!("expected numeric field, got {other}")),
        }
    }
}

#[async_trait]
impl CandleStore for HttpCandleStore {
    #[instrument(skip(self), name = "history::fetch_candles")]
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, String> {
        let mut url = format!(
            "{}/api/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, timeframe, limit
        );
        if let Some(end) = end_time {
            url.push_str(&format!("&endTime={end}"));
        }

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("GET klines request failed: {e}"))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| format!("failed to parse klines response: {e}"))?;

        if !status.is_success() {
            return Err(format!("klines endpoint returned {status}: {body}"));
        }

        let raw = body.as_array().ok_or_else(|| "klines response is not an array".to_string())?;
        let mut candles = Vec::with_capacity(raw.len());

        for entry in raw {
            let arr = match entry.as_array() {
                Some(a) => a,
                None => {
                    warn!("skipping kline entry that is not an array");
                    continue;
                }
            };
            if arr.len() < 6 {
                warn!("skipping malformed kline entry with {} elements", arr.len());
                continue;
            }

            let open_time = arr[0].as_i64().unwrap_or(0);
            let open = match Self::parse_str_f64(&arr[1]) {
                Ok(v) => v,
                Err(e) => {
                    warn!(%e, "skipping kline entry with unparseable open");
                    continue;
                }
            };
            let high = match Self::parse_str_f64(&arr[2]) {
                Ok(v) => v,
                Err(e) => {
                    warn!(%e, "skipping kline entry with unparseable high");
                    continue;
                }
            };
            let low = match Self::parse_str_f64(&arr[3]) {
                Ok(v) => v,
                Err(e) => {
                    warn!(%e, "skipping kline entry with unparseable low");
                    continue;
                }
            };
            let close = match Self::parse_str_f64(&arr[4]) {
                Ok(v) => v,
                Err(e) => {
                    warn!(%e, "skipping kline entry with unparseable close");
                    continue;
                }
            };
            let volume = match Self::parse_str_f64(&arr[5]) {
                Ok(v) => v,
                Err(e) => {
                    warn!(%e, "skipping kline entry with unparseable volume");
                    continue;
                }
            };

            match Candle::new(symbol, timeframe, open_time, open, high, low, close, volume) {
                Ok(c) => candles.push(c),
                Err(e) => warn!(%e, "skipping kline entry that violates candle invariants"),
            }
        }

        debug!(symbol, %timeframe, count = candles.len(), "klines fetched");
        Ok(candles)
    }
}

#[derive(Clone)]
struct CacheEntry {
    window: CandleWindow,
    expires_at: Instant,
}

/// Wraps a `CandleStore` with retry-with-backoff and an optional short-TTL
/// cache per `(symbol, timeframe)`. The cache is non-authoritative: a miss
/// always falls through to the store.
pub struct HistoryLoader {
    store: Box<dyn CandleStore>,
    cache: Mutex<HashMap<(String, Timeframe), CacheEntry>>,
    cache_enabled: bool,
}

impl HistoryLoader {
    pub fn new(store: Box<dyn CandleStore>, cache_enabled: bool) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            cache_enabled,
        }
    }

    /// Fetch `limit` most recent closed candles for `(symbol, timeframe)`,
    /// retrying transport failures up to `MAX_ATTEMPTS` times with a short
    /// exponential backoff, then surfacing `HistoryError::StorageUnavailable`.
    /// `min_len` is the actual minimum window length the caller's selected
    /// strategies need (the most demanding enabled strategy's indicator
    /// lookback, per spec) — a window shorter than that is rejected with
    /// `HistoryError::InsufficientData` even if the store returned `limit`
    /// candles without error.
    #[instrument(skip(self), name = "history::load")]
    pub async fn load(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        min_len: usize,
        end_time: Option<i64>,
    ) -> Result<CandleWindow, HistoryError> {
        let key = (symbol.to_string(), timeframe);

        if self.cache_enabled && end_time.is_none() {
            if let Some(entry) = self.cache.lock().get(&key) {
                if entry.expires_at > Instant::now() && entry.window.len() >= limit {
                    return Ok(entry.window.clone());
                }
            }
        }

        let mut last_err = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            match self.store.fetch_candles(symbol, timeframe, limit, end_time).await {
                Ok(candles) => {
                    if candles.is_empty() {
                        return Err(HistoryError::InsufficientData {
                            symbol: symbol.to_string(),
                            timeframe: timeframe.to_string(),
                            available: 0,
                            required: limit,
                        });
                    }

                    let window = CandleWindow::new(candles)?;
                    window.require_min_len(min_len)?;

                    if self.cache_enabled && end_time.is_none() {
                        let ttl = Duration::from_millis((timeframe.duration_ms() / 2).max(1000) as u64);
                        self.cache.lock().insert(
                            key,
                            CacheEntry {
                                window: window.clone(),
                                expires_at: Instant::now() + ttl,
                            },
                        );
                    }

                    return Ok(window);
                }
                Err(e) => {
                    warn!(symbol, %timeframe, attempt, error = %e, "candle fetch attempt failed");
                    last_err = e;
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(BASE_BACKOFF * 2u32.pow(attempt)).await;
                    }
                }
            }
        }

        Err(HistoryError::StorageUnavailable(last_err))
    }
}
