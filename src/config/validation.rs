// =============================================================================
// Configuration validation
// =============================================================================

use crate::config::model::ApplicationConfig;
use crate::error::ConfigError;

/// Closed set of recognized quote currencies a `symbol` must end in, per
/// §4.7. Covers the exchange's dominant USDT-quoted pairs (`BTCUSDT`,
/// `ETHUSDT`, ...) plus the other quote assets common on the same exchange.
const RECOGNIZED_QUOTE_CURRENCIES: [&str; 6] = ["USDT", "BUSD", "USDC", "BTC", "ETH", "BNB"];

/// `^[A-Z0-9]{6,12}$` per §4.7 — uppercase base+quote ticker, ending in a
/// recognized quote currency.
pub fn validate_symbol(symbol: &str) -> Result<(), ConfigError> {
    let len_ok = (6..=12).contains(&symbol.len());
    let charset_ok = !symbol.is_empty() && symbol.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if !len_ok || !charset_ok {
        return Err(ConfigError::Validation(format!(
            "symbol '{symbol}' must be 6-12 uppercase alphanumeric characters"
        )));
    }
    let quote_ok = RECOGNIZED_QUOTE_CURRENCIES.iter().any(|q| symbol.ends_with(q));
    if !quote_ok {
        return Err(ConfigError::Validation(format!(
            "symbol '{symbol}' does not end in a recognized quote currency"
        )));
    }
    Ok(())
}

pub fn validate_confidence_window(min_confidence: f64, max_confidence: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&min_confidence) || !(0.0..=1.0).contains(&max_confidence) {
        return Err(ConfigError::Validation(
            "min_confidence and max_confidence must fall within [0, 1]".to_string(),
        ));
    }
    if min_confidence > max_confidence {
        return Err(ConfigError::Validation(
            "min_confidence must not exceed max_confidence".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_application_config(config: &ApplicationConfig) -> Result<(), ConfigError> {
    if config.supported_symbols.is_empty() {
        return Err(ConfigError::Validation("supported_symbols must not be empty".to_string()));
    }
    for symbol in &config.supported_symbols {
        validate_symbol(symbol)?;
    }
    if config.supported_timeframes.is_empty() {
        return Err(ConfigError::Validation("supported_timeframes must not be empty".to_string()));
    }
    validate_confidence_window(config.min_confidence, config.max_confidence)?;
    if config.max_positions < 1 {
        return Err(ConfigError::Validation("max_positions must be at least 1".to_string()));
    }
    if config.position_sizes.is_empty() {
        return Err(ConfigError::Validation("position_sizes must not be empty".to_string()));
    }
    if config.position_sizes.iter().any(|&s| s <= 0.0) {
        return Err(ConfigError::Validation("position_sizes must all be positive".to_string()));
    }
    Ok(())
}

/// Strategy params must deserialize as a JSON object (or be null, meaning
/// "use compiled-in defaults") — strategies deserialize this into their own
/// typed struct and silently fall back to defaults on a bad shape, but a
/// wholesale non-object value at the config layer is rejected outright.
pub fn validate_strategy_params(params: &serde_json::Value) -> Result<(), ConfigError> {
    if !params.is_null() && !params.is_object() {
        return Err(ConfigError::Validation("strategy params must be a JSON object".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_symbol() {
        assert!(validate_symbol("BTCUSDT").is_ok());
    }

    #[test]
    fn rejects_lowercase_symbol() {
        assert!(validate_symbol("btcusdt").is_err());
    }

    #[test]
    fn rejects_too_short_symbol() {
        assert!(validate_symbol("BTC").is_err());
    }

    #[test]
    fn rejects_unrecognized_quote_currency() {
        assert!(validate_symbol("BTCDOGE1").is_err());
    }

    #[test]
    fn accepts_btc_quoted_symbol() {
        assert!(validate_symbol("ETHBTC").is_ok());
    }

    #[test]
    fn rejects_zero_max_positions() {
        let mut config = ApplicationConfig::default();
        config.max_positions = 0;
        assert!(validate_application_config(&config).is_err());
    }

    #[test]
    fn rejects_empty_position_sizes() {
        let mut config = ApplicationConfig::default();
        config.position_sizes = vec![];
        assert!(validate_application_config(&config).is_err());
    }

    #[test]
    fn rejects_non_positive_position_size() {
        let mut config = ApplicationConfig::default();
        config.position_sizes = vec![0.1, -0.05];
        assert!(validate_application_config(&config).is_err());
    }

    #[test]
    fn rejects_inverted_confidence_window() {
        assert!(validate_confidence_window(0.9, 0.5).is_err());
    }

    #[test]
    fn rejects_non_object_params() {
        assert!(validate_strategy_params(&serde_json::json!([1, 2, 3])).is_err());
    }

    #[test]
    fn accepts_null_params() {
        assert!(validate_strategy_params(&serde_json::Value::Null).is_ok());
    }
}
