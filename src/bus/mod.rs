// =============================================================================
// Pub/sub bus (NATS)
// =============================================================================
//
// Connect, subscribe, loop until the stream ends or errors, return so the
// caller reconnects — the same shape as a WebSocket market-data supervisor,
// applied to NATS, with the backoff capped at ~30s per the listener's
// reconnection contract.

use std::time::Duration;

use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Transport abstraction for the candle-update subscription, so the listener
/// can be driven by an in-memory fake in tests instead of a live NATS server.
#[async_trait]
pub trait CandleTransport: Send {
    /// Receive the next raw message payload. `None` means the subscription
    /// ended (connection dropped) and the caller should reconnect.
    async fn recv(&mut self) -> Option<Vec<u8>>;
}

pub struct NatsCandleTransport {
    subscriber: async_nats::Subscriber,
}

impl NatsCandleTransport {
    #[tracing::instrument(skip(client), name = "bus::subscribe_candles")]
    pub async fn connect(
        client: &Client,
        subject: &str,
        queue_group: &str,
    ) -> Result<Self, async_nats::SubscribeError> {
        let subscriber = client.queue_subscribe(subject.to_string(), queue_group.to_string()).await?;
        info!(subject, queue_group, "subscribed to candle updates");
        Ok(Self { subscriber })
    }
}

#[async_trait]
impl CandleTransport for NatsCandleTransport {
    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.subscriber.next().await.map(|m| m.payload.to_vec())
    }
}

/// Publish-side abstraction for the Signal Publisher's bus sink.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), String>;
}

pub struct NatsSignalSink {
    client: Client,
}

impl NatsSignalSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SignalSink for NatsSignalSink {
    #[tracing::instrument(skip(self, payload), name = "bus::publish_signal")]
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), String> {
        self.client
            .publish(subject.to_string(), Bytes::from(payload))
            .await
            .map_err(|e| format!("nats publish failed: {e}"))
    }
}

/// Connect to NATS, retrying with capped exponential backoff. Used both at
/// startup and whenever the subscriber loop below needs to re-establish a
/// dropped connection.
#[tracing::instrument(name = "bus::connect")]
pub async fn connect_with_retry(url: &str) -> Client {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match async_nats::connect(url).await {
            Ok(client) => {
                info!(url, "connected to NATS");
                return client;
            }
            Err(e) => {
                warn!(url, error = %e, backoff_secs = backoff.as_secs(), "NATS connect failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// Run the candle-update subscription loop: connect, subscribe, forward every
/// payload to `tx`, and return when the subscription ends so the caller can
/// reconnect with backoff. The function itself does not sleep or retry; that
/// is the caller's job (see `main.rs`), using a `tokio::spawn { loop { run(...);
/// sleep(...) } }` supervisor pattern.
pub async fn run_candle_subscriber(
    mut transport: Box<dyn CandleTransport>,
    tx: tokio::sync::mpsc::Sender<Vec<u8>>,
) {
    loop {
        match transport.recv().await {
            Some(payload) => {
                debug!(bytes = payload.len(), "candle message received");
                if tx.send(payload).await.is_err() {
                    warn!("candle dispatch channel closed, stopping subscriber");
                    return;
                }
            }
            None => {
                warn!("candle subscription ended");
                return;
            }
        }
    }
}
