// =============================================================================
// Signal Publisher (C6)
// =============================================================================
//
// Delivers each surviving Signal to three independent sinks — pub/sub bus,
// downstream HTTP endpoint, audit store — each with its own bounded,
// drop-oldest queue and worker task. Fire-and-forget from the Engine's
// perspective: `publish` enqueues and returns; sink failures are logged and
// counted, never propagated back to the Engine. The HTTP sink's manual
// retry loop (three attempts, 100ms/400ms/1.6s backoff, 5s per-attempt
// deadline) follows a direct `reqwest` retry idiom, the same as used in
// `binance/client.rs` rather than pulling in a retry middleware crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::bus::SignalSink;
use crate::error::ConfigError;
use crate::signal::Signal;

const QUEUE_CAPACITY: usize = 256;
const HTTP_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
const HTTP_BACKOFF: [Duration; 3] = [Duration::from_millis(100), Duration::from_millis(400), Duration::from_millis(1600)];

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, signal: &Signal) -> Result<(), String>;
}

const SIGNAL_AUDIT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS signal_audit (
    id TEXT PRIMARY KEY,
    strategy_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    action TEXT NOT NULL,
    confidence REAL NOT NULL,
    price REAL NOT NULL,
    payload TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS signal_audit_symbol_idx ON signal_audit(symbol, timestamp);
"#;

/// Durable record of every published signal, grounded on the same
/// open-per-call `rusqlite` idiom as `config::store::RelationalConfigStore`.
pub struct SqliteSignalAuditStore {
    path: std::path::PathBuf,
}

impl SqliteSignalAuditStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Result<Self, ConfigError> {
        let store = Self { path: path.into() };
        store.connect()?.execute_batch(SIGNAL_AUDIT_SCHEMA)?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Ok(conn)
    }
}

#[async_trait]
impl AuditStore for SqliteSignalAuditStore {
    async fn append(&self, signal: &Signal) -> Result<(), String> {
        let conn = self.connect().map_err(|e| e.to_string())?;
        let payload = serde_json::to_string(signal).map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT OR REPLACE INTO signal_audit
             (id, strategy_id, symbol, timeframe, action, confidence, price, payload, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                signal.id.to_string(),
                signal.strategy_id,
                signal.symbol,
                signal.timeframe.to_string(),
                signal.action.to_string(),
                signal.confidence,
                signal.price,
                payload,
                signal.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Bounded, drop-oldest async queue shared between a sink's producer (the
/// Publisher) and its single worker task.
struct SinkQueue {
    items: Mutex<VecDeque<Signal>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl SinkQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, signal: Signal) {
        {
            let mut guard = self.items.lock();
            if guard.len() >= QUEUE_CAPACITY {
                guard.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            guard.push_back(signal);
        }
        self.notify.notify_one();
    }

    async fn pop(&self) -> Signal {
        loop {
            if let Some(signal) = self.items.lock().pop_front() {
                return signal;
            }
            self.notify.notified().await;
        }
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Spawns and owns the three sink workers. Cloning is cheap (`Arc` internals).
#[derive(Clone)]
pub struct SignalPublisher {
    bus_queue: Arc<SinkQueue>,
    http_queue: Arc<SinkQueue>,
    audit_queue: Arc<SinkQueue>,
}

impl SignalPublisher {
    pub fn spawn(
        bus_sink: Option<Arc<dyn SignalSink>>,
        bus_subject: String,
        http_client: Option<reqwest::Client>,
        http_endpoint: Option<String>,
        audit_store: Option<Arc<dyn AuditStore>>,
    ) -> Self {
        let bus_queue = Arc::new(SinkQueue::new());
        let http_queue = Arc::new(SinkQueue::new());
        let audit_queue = Arc::new(SinkQueue::new());

        if let Some(sink) = bus_sink {
            let queue = bus_queue.clone();
            tokio::spawn(async move {
                loop {
                    let signal = queue.pop().await;
                    run_bus_sink(&sink, &bus_subject, &signal).await;
                }
            });
        }

        if let (Some(client), Some(endpoint)) = (http_client, http_endpoint) {
            let queue = http_queue.clone();
            tokio::spawn(async move {
                loop {
                    let signal = queue.pop().await;
                    run_http_sink(&client, &endpoint, &signal).await;
                }
            });
        }

        if let Some(store) = audit_store {
            let queue = audit_queue.clone();
            tokio::spawn(async move {
                loop {
                    let signal = queue.pop().await;
                    run_audit_sink(&store, &signal).await;
                }
            });
        }

        Self {
            bus_queue,
            http_queue,
            audit_queue,
        }
    }

    /// Enqueue `signal` on every configured sink. Returns immediately; sinks
    /// that were not configured (e.g. no bus client available) simply drop
    /// the item on their queue since nothing ever drains it. Since every
    /// sink's queue always exists, this call never blocks the Engine.
    pub fn publish(&self, signal: Signal) {
        self.bus_queue.push(signal.clone());
        self.http_queue.push(signal.clone());
        self.audit_queue.push(signal);
    }

    pub fn dropped_counts(&self) -> (u64, u64, u64) {
        (
            self.bus_queue.dropped_count(),
            self.http_queue.dropped_count(),
            self.audit_queue.dropped_count(),
        )
    }
}

#[tracing::instrument(skip(sink, signal), name = "publisher::bus_sink")]
async fn run_bus_sink(sink: &Arc<dyn SignalSink>, subject_prefix: &str, signal: &Signal) {
    let payload = match serde_json::to_vec(signal) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to serialize signal for bus sink");
            return;
        }
    };
    let subject = format!("{subject_prefix}.{}", signal.strategy_id);
    if let Err(e) = sink.publish(&subject, payload).await {
        warn!(error = %e, signal_id = %signal.id, "bus publish failed, relying on client reconnect");
    } else {
        debug!(signal_id = %signal.id, subject, "signal published to bus");
    }
}

#[tracing::instrument(skip(client, signal), name = "publisher::http_sink")]
async fn run_http_sink(client: &reqwest::Client, endpoint: &str, signal: &Signal) {
    let mut last_err = String::new();

    for (attempt, backoff) in HTTP_BACKOFF.iter().enumerate() {
        let result = tokio::time::timeout(
            HTTP_ATTEMPT_TIMEOUT,
            client.post(endpoint).json(signal).send(),
        )
        .await;

        match result {
            Ok(Ok(resp)) if resp.status().is_success() => {
                debug!(signal_id = %signal.id, attempt, "signal delivered to HTTP sink");
                return;
            }
            Ok(Ok(resp)) => {
                last_err = format!("HTTP sink returned {}", resp.status());
            }
            Ok(Err(e)) => {
                last_err = format!("HTTP sink request failed: {e}");
            }
            Err(_) => {
                last_err = "HTTP sink attempt timed out".to_string();
            }
        }

        warn!(signal_id = %signal.id, attempt, error = %last_err, "HTTP sink attempt failed");
        if attempt + 1 < HTTP_BACKOFF.len() {
            tokio::time::sleep(*backoff).await;
        }
    }

    error!(signal_id = %signal.id, error = %last_err, "HTTP sink exhausted retries");
}

#[tracing::instrument(skip(store, signal), name = "publisher::audit_sink")]
async fn run_audit_sink(store: &Arc<dyn AuditStore>, signal: &Signal) {
    for attempt in 0..2 {
        match store.append(signal).await {
            Ok(()) => {
                debug!(signal_id = %signal.id, attempt, "signal appended to audit store");
                return;
            }
            Err(e) => {
                warn!(signal_id = %signal.id, attempt, error = %e, "audit append attempt failed");
            }
        }
    }
    error!(signal_id = %signal.id, "audit sink exhausted retries");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalDraft;
    use crate::types::{Action, Timeframe};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as TokioMutex;

    struct FakeBusSink {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl SignalSink for FakeBusSink {
        async fn publish(&self, _subject: &str, _payload: Vec<u8>) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("simulated failure".to_string())
            } else {
                Ok(())
            }
        }
    }

    struct FakeAuditStore {
        records: Arc<TokioMutex<Vec<String>>>,
    }

    #[async_trait]
    impl AuditStore for FakeAuditStore {
        async fn append(&self, signal: &Signal) -> Result<(), String> {
            self.records.lock().await.push(signal.id.to_string());
            Ok(())
        }
    }

    fn sample_signal() -> Signal {
        SignalDraft::new("momentum_pulse", "BTCUSDT", Timeframe::M15, Action::Buy, 0.7, 100.0)
            .finalize(chrono::Utc::now())
    }

    #[tokio::test]
    async fn publish_reaches_bus_and_audit_sinks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bus = Arc::new(FakeBusSink {
            calls: calls.clone(),
            fail: false,
        });
        let records = Arc::new(TokioMutex::new(Vec::new()));
        let audit = Arc::new(FakeAuditStore { records: records.clone() });

        let publisher = SignalPublisher::spawn(Some(bus), "signals".to_string(), None, None, Some(audit));
        publisher.publish(sample_signal());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(records.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn queue_drops_oldest_on_overflow() {
        let queue = SinkQueue::new();
        for _ in 0..QUEUE_CAPACITY + 5 {
            queue.push(sample_signal());
        }
        assert_eq!(queue.dropped_count(), 5);
    }

    #[tokio::test]
    async fn unconfigured_sinks_do_not_block_publish() {
        let publisher = SignalPublisher::spawn(None, "signals".to_string(), None, None, None);
        publisher.publish(sample_signal());
        let (bus_dropped, http_dropped, audit_dropped) = publisher.dropped_counts();
        assert_eq!(bus_dropped + http_dropped + audit_dropped, 0);
    }
}
