// =============================================================================
// Message Listener (C1)
// =============================================================================
//
// Decodes raw candle-update payloads from the bus and dispatches them to a
// fixed array of shards keyed by `(symbol, timeframe)`. Each shard has
// exactly one consumer task, which guarantees in-order, non-concurrent
// processing for a given pair while shards themselves run in parallel.
// Overflow on a full shard drops the oldest queued message and increments a
// counter — the bus emits strictly periodically, so the freshest candle is
// the one worth keeping. `tokio::sync::mpsc` has no drop-oldest mode, so the
// shard queue is a small ring buffer guarded by a `parking_lot::Mutex`,
// using a `VecDeque` behind a lock, one per shard.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ListenerError;
use crate::types::Timeframe;

/// Decoded form of an inbound candle-update message. Per the bus contract,
/// the payload may either embed a recent window directly or be a bare
/// "candle closed" trigger carrying only the close time — the Engine fetches
/// history itself in the latter case.
#[derive(Debug, Clone, Deserialize)]
pub struct CandleMessage {
    pub symbol: String,
    pub timeframe: Timeframe,
    #[serde(default)]
    pub candles: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub close_time: Option<i64>,
}

impl CandleMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, ListenerError> {
        let msg: CandleMessage =
            serde_json::from_slice(payload).map_err(|e| ListenerError::Decode(e.to_string()))?;
        if msg.symbol.trim().is_empty() {
            return Err(ListenerError::Decode("empty symbol".to_string()));
        }
        if msg.candles.is_none() && msg.close_time.is_none() {
            return Err(ListenerError::Decode(
                "message carries neither an embedded window nor a close_time trigger".to_string(),
            ));
        }
        Ok(msg)
    }
}

/// A bounded, drop-oldest queue: pushing onto a full queue evicts the oldest
/// entry rather than blocking or rejecting the new one.
struct RingQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> RingQueue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, item: T) {
        let mut guard = self.items.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(item);
        self.not_empty.notify_one();
    }

    fn pop_blocking(&self) -> T {
        let mut guard = self.items.lock();
        loop {
            if let Some(item) = guard.pop_front() {
                return item;
            }
            self.not_empty.wait(&mut guard);
        }
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

const SHARD_COUNT: usize = 16;
const SHARD_CAPACITY: usize = 64;

fn shard_index(symbol: &str, timeframe: Timeframe) -> usize {
    let mut hasher = DefaultHasher::new();
    symbol.hash(&mut hasher);
    timeframe.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

/// Owns the fixed shard array and spawns one consumer task per shard. Each
/// consumer invokes `handler` for every message on its shard, serially.
pub struct ShardedDispatcher {
    shards: Vec<Arc<RingQueue<CandleMessage>>>,
}

impl ShardedDispatcher {
    /// Spawn `SHARD_COUNT` consumer tasks, each calling `handler(message)` in
    /// a loop. `handler` should be cheap to clone (e.g. an `Arc`-wrapped
    /// Engine) since every shard gets its own copy.
    pub fn spawn<F, Fut>(handler: F) -> Self
    where
        F: Fn(CandleMessage) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let shards: Vec<Arc<RingQueue<CandleMessage>>> =
            (0..SHARD_COUNT).map(|_| Arc::new(RingQueue::new(SHARD_CAPACITY))).collect();

        for shard in &shards {
            let shard = shard.clone();
            let handler = handler.clone();
            tokio::task::spawn_blocking(move || {
                let rt = tokio::runtime::Handle::current();
                loop {
                    let msg = shard.pop_blocking();
                    rt.block_on((handler)(msg));
                }
            });
        }

        Self { shards }
    }

    /// Route a decoded message to its shard, dropping the oldest queued
    /// message on that shard if it is full.
    pub fn dispatch(&self, message: CandleMessage) {
        let idx = shard_index(&message.symbol, message.timeframe);
        self.shards[idx].push(message);
    }

    /// Total dropped-due-to-overflow count across all shards, for metrics.
    pub fn dropped_count(&self) -> u64 {
        self.shards.iter().map(|s| s.dropped_count()).sum()
    }
}

/// Drain raw payloads from the bus, decode each one, and dispatch decoded
/// messages to the sharded consumer pool. Decode failures are logged and
/// dropped — no retry, since candles are replayed upstream periodically.
pub async fn run_listener(mut rx: tokio::sync::mpsc::Receiver<Vec<u8>>, dispatcher: Arc<ShardedDispatcher>) {
    while let Some(payload) = rx.recv().await {
        match CandleMessage::decode(&payload) {
            Ok(message) => {
                debug!(symbol = %message.symbol, timeframe = %message.timeframe, "candle message decoded");
                dispatcher.dispatch(message);
            }
            Err(e) => {
                warn!(error = %e, "dropping undecodable candle message");
            }
        }
    }
}
