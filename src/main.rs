// =============================================================================
// Real-Time Technical-Analysis Signal Engine — Main Entry Point
// =============================================================================
//
// Wires the persistence chain, the bus, the sharded candle listener, the
// signal engine and the admin HTTP surface together, then blocks until
// Ctrl+C. Every long-running loop is its own `tokio::spawn`ed supervisor,
// one task per subsystem plus a
// final `tokio::signal::ctrl_c()` wait.

mod api;
mod bus;
mod candle;
mod config;
mod engine;
mod error;
mod history;
mod indicators;
mod listener;
mod publisher;
mod risk;
mod signal;
mod strategy;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::admin::AdminState;
use crate::bus::{connect_with_retry, run_candle_subscriber, NatsCandleTransport, NatsSignalSink};
use crate::config::model::ApplicationConfig;
use crate::config::store::{DocumentConfigStore, HttpConfigStore, RelationalConfigStore};
use crate::config::ConfigManager;
use crate::engine::Engine;
use crate::history::{HistoryLoader, HttpCandleStore};
use crate::listener::{run_listener, ShardedDispatcher};
use crate::publisher::{SignalPublisher, SqliteSignalAuditStore};
use crate::risk::RiskDefaults;
use crate::strategy::StrategyRegistry;

const CANDLE_SUBJECT: &str = "market.candles.closed";
const CANDLE_QUEUE_GROUP: &str = "ta-signal-engine";
const SIGNAL_SUBJECT_PREFIX: &str = "signals.ta";

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("technical-analysis signal engine starting up");

    // ── 1. Persistence chain: HTTP data-manager (primary), JSON documents
    // and a SQLite relational store as successive fallbacks. Environment
    // defaults are handled by ConfigManager itself when every store misses. ──
    let mut stores: Vec<Box<dyn config::store::ConfigStore>> = Vec::new();
    if let Ok(url) = std::env::var("CONFIG_HTTP_URL") {
        stores.push(Box::new(HttpConfigStore::new(url)));
    }
    let data_dir = env_or("CONFIG_DATA_DIR", "./data/config");
    stores.push(Box::new(DocumentConfigStore::new(data_dir)));
    let sqlite_path = env_or("CONFIG_SQLITE_PATH", "./data/config.sqlite");
    match RelationalConfigStore::new(sqlite_path) {
        Ok(store) => stores.push(Box::new(store)),
        Err(e) => warn!(error = %e, "relational config store unavailable, continuing without it"),
    }

    let config_manager = Arc::new(ConfigManager::new(stores, ApplicationConfig::default(), false));
    let strategy_registry = Arc::new(StrategyRegistry::with_defaults());
    info!(strategies = strategy_registry.len(), "strategy registry built");

    // ── 2. History loader, backed by the candle time-series HTTP store. ──
    let history_base_url = env_or("CANDLE_STORE_URL", "http://localhost:8090");
    let candle_store = Box::new(HttpCandleStore::new(history_base_url));
    let history_loader = Arc::new(HistoryLoader::new(candle_store, true));

    // ── 3. Bus connection, used by both the candle subscriber and the
    // signal bus sink. ──
    let nats_url = env_or("NATS_URL", "nats://localhost:4222");
    let nats_client = connect_with_retry(&nats_url).await;

    // ── 4. Signal publisher: bus + downstream HTTP + SQLite audit sinks. ──
    let bus_sink: Option<Arc<dyn bus::SignalSink>> = Some(Arc::new(NatsSignalSink::new(nats_client.clone())));
    let http_endpoint = std::env::var("SIGNAL_HTTP_ENDPOINT").ok();
    let http_client = http_endpoint.as_ref().map(|_| {
        reqwest::Client::builder()
            .build()
            .expect("failed to build reqwest client")
    });
    let audit_path = env_or("SIGNAL_AUDIT_SQLITE_PATH", "./data/signal_audit.sqlite");
    let audit_store: Option<Arc<dyn publisher::AuditStore>> = match SqliteSignalAuditStore::new(audit_path) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(error = %e, "signal audit store unavailable, signals will not be durably recorded");
            None
        }
    };

    let publisher = SignalPublisher::spawn(
        bus_sink,
        SIGNAL_SUBJECT_PREFIX.to_string(),
        http_client,
        http_endpoint,
        audit_store,
    );

    // ── 5. The Engine itself. ──
    let engine = Engine::new(
        config_manager.clone(),
        history_loader,
        strategy_registry.clone(),
        publisher,
        RiskDefaults::default(),
    );

    // ── 6. Sharded dispatcher + candle subscriber + listener, feeding the
    // Engine. Reconnects with capped backoff whenever the subscription ends. ──
    let dispatcher = Arc::new(ShardedDispatcher::spawn(move |message| {
        let engine = engine.clone();
        async move {
            engine.on_candle_update(message).await;
        }
    }));

    let (tx, rx) = tokio::sync::mpsc::channel(1024);
    tokio::spawn(run_listener(rx, dispatcher));

    let subscriber_client = nats_client.clone();
    tokio::spawn(async move {
        loop {
            match NatsCandleTransport::connect(&subscriber_client, CANDLE_SUBJECT, CANDLE_QUEUE_GROUP).await {
                Ok(transport) => {
                    run_candle_subscriber(Box::new(transport), tx.clone()).await;
                }
                Err(e) => {
                    error!(error = %e, "failed to subscribe to candle subject, retrying in 5s");
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
    });

    // ── 7. Admin HTTP server. ──
    let admin_state = Arc::new(AdminState {
        config_manager: config_manager.clone(),
        strategy_registry: strategy_registry.clone(),
    });
    let bind_addr = env_or("ADMIN_BIND_ADDR", "0.0.0.0:8081");
    tokio::spawn(async move {
        let app = api::admin::router(admin_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind admin HTTP server");
        info!(addr = %bind_addr, "admin HTTP server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "admin HTTP server exited");
        }
    });

    info!("all subsystems running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received");

    Ok(())
}
