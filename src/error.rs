// =============================================================================
// Error taxonomy
// =============================================================================
//
// Each component boundary gets its own error enum. Transient I/O is retried
// by the component that owns the retry policy; everything that reaches here
// has already exhausted retries or is terminal by nature. `main.rs` and other
// wiring code use `anyhow::Result` and `.context(...)` for ad hoc failures;
// these typed enums live at the component seams instead.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to decode candle message: {0}")]
    Decode(String),

    #[error("subscription lost: {0}")]
    SubscriptionLost(String),

    #[error("bus connect failed: {0}")]
    ConnectFailed(#[from] async_nats::ConnectError),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("insufficient candles for {symbol} {timeframe}: have {available}, need {required}")]
    InsufficientData {
        symbol: String,
        timeframe: String,
        available: usize,
        required: usize,
    },

    #[error("candle window for {symbol} {timeframe} has a gap at {at}")]
    GappedWindow {
        symbol: String,
        timeframe: String,
        at: i64,
    },

    #[error("candle store unavailable after retries: {0}")]
    StorageUnavailable(String),
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("strategy '{strategy_id}' panicked: {message}")]
    Panicked { strategy_id: String, message: String },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("bus publish failed: {0}")]
    Bus(String),

    #[error("http sink rejected signal terminally (status {status}): {body}")]
    HttpTerminal { status: u16, body: String },

    #[error("http sink exhausted retries: {0}")]
    HttpExhausted(String),

    #[error("audit store append failed: {0}")]
    Audit(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no persistence store accepted the write: {0}")]
    AllStoresUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("relational store error: {0}")]
    Sql(#[from] rusqlite::Error),
}

impl ConfigError {
    /// Stable machine-readable code for the `{"success":false,"error":{"code":...}}`
    /// envelope used by the admin HTTP surface.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Validation(_) => "VALIDATION_ERROR",
            ConfigError::AllStoresUnavailable(_) => "STORAGE_UNAVAILABLE",
            ConfigError::NotFound(_) => "NOT_FOUND",
            ConfigError::Io(_) | ConfigError::Serde(_) | ConfigError::Sql(_) => "STORAGE_ERROR",
        }
    }
}
