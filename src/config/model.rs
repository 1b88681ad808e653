// =============================================================================
// Configuration data model
// =============================================================================

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::Timeframe;

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string(), "ADAUSDT".to_string()]
}

fn default_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::M15, Timeframe::H1]
}

fn default_enabled_strategies() -> Vec<String> {
    crate::strategy::StrategyRegistry::with_defaults()
        .ids()
        .into_iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_min_confidence() -> f64 {
    0.5
}

fn default_max_confidence() -> f64 {
    1.0
}

fn default_cache_ttl_seconds() -> u64 {
    60
}

fn default_max_positions() -> u32 {
    5
}

fn default_position_sizes() -> Vec<f64> {
    vec![0.1]
}

/// Global application configuration, per §4.7. Every field carries
/// `#[serde(default)]` so an older document stays loadable when a new field
/// is added later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_symbols")]
    pub supported_symbols: Vec<String>,
    #[serde(default = "default_timeframes")]
    pub supported_timeframes: Vec<Timeframe>,
    #[serde(default = "default_enabled_strategies")]
    pub enabled_strategies: Vec<String>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_max_confidence")]
    pub max_confidence: f64,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,
    #[serde(default = "default_position_sizes")]
    pub position_sizes: Vec<f64>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            supported_symbols: default_symbols(),
            supported_timeframes: default_timeframes(),
            enabled_strategies: default_enabled_strategies(),
            min_confidence: default_min_confidence(),
            max_confidence: default_max_confidence(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            max_positions: default_max_positions(),
            position_sizes: default_position_sizes(),
        }
    }
}

/// Scope of a strategy config override: global defaults, or a single symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigScope {
    Global,
    Symbol(String),
}

impl fmt::Display for ConfigScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigScope::Global => write!(f, "global"),
            ConfigScope::Symbol(s) => write!(f, "{s}"),
        }
    }
}

/// A per-strategy configuration override, either global or per-symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy_id: String,
    pub scope: ConfigScope,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub params: Value,
}

fn default_true() -> bool {
    true
}

impl StrategyConfig {
    pub fn storage_key(strategy_id: &str, scope: &ConfigScope) -> String {
        format!("strategy:{strategy_id}:{scope}")
    }
}

/// A versioned document as persisted by a `ConfigStore`. The version counter
/// is what makes idempotent-reapply detectable: a patch that produces the
/// same `data` as the current version is a no-op, not a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedDocument {
    pub version: u64,
    pub data: Value,
}

/// One audit trail entry, most-recent-first when listed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub target: String,
    pub action: String,
    pub changed_by: String,
    pub reason: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

pub const APPLICATION_CONFIG_KEY: &str = "application";
